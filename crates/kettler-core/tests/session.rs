use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use kettler_core::activity::{ActivitySampler, ActivityState};
use kettler_core::protocol::{DeviceIdentity, ExerciseDevice, ProtocolError, Status};
use kettler_core::session::{
    Clock, ManualClock, Phase, SessionConfig, SessionEvent, SessionMachine,
};
use kettler_core::stats::{SessionRecord, SqliteStatsStore, StatsError, StatsStore};
use kettler_core::telemetry::TelemetrySink;
use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn status(speed_kmph: f64, distance_km: f64, energy_kjoule: u32) -> Status {
    Status {
        heart_rate_bpm: if speed_kmph > 0.0 { 110 } else { 0 },
        exercise_rpm: (speed_kmph * 3.0) as u32,
        speed_kmph,
        distance_km,
        dest_power_watt: 100,
        energy_kjoule,
        time_elapsed_sec: (distance_km * 200.0) as u32,
        real_power_watt: 0,
    }
}

/// Device replaying scripted poll results, then reporting an idle console
struct ScriptedDevice {
    script: VecDeque<Result<Status, ProtocolError>>,
    idle: Status,
    polls: Rc<Cell<usize>>,
    resets: Rc<Cell<usize>>,
    fail_reset: bool,
}

impl ScriptedDevice {
    fn new(script: Vec<Result<Status, ProtocolError>>) -> Self {
        Self {
            script: script.into(),
            idle: status(0.0, 0.0, 0),
            polls: Rc::new(Cell::new(0)),
            resets: Rc::new(Cell::new(0)),
            fail_reset: false,
        }
    }

    /// Ride for `riding` polls, then sit idle with the final counters
    fn ride(riding: usize) -> Self {
        let script = (1..=riding)
            .map(|i| Ok(status(20.0, i as f64 * 0.5, i as u32 * 40)))
            .collect();
        let mut device = Self::new(script);
        device.idle = status(0.0, riding as f64 * 0.5, riding as u32 * 40);
        device
    }
}

impl ExerciseDevice for ScriptedDevice {
    fn status(&mut self) -> Result<Status, ProtocolError> {
        self.polls.set(self.polls.get() + 1);
        self.script.pop_front().unwrap_or(Ok(self.idle))
    }

    fn reset(&mut self) -> Result<(), ProtocolError> {
        self.resets.set(self.resets.get() + 1);
        if self.fail_reset {
            return Err(ProtocolError::Device {
                command: "RS".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    published: RefCell<Vec<Status>>,
}

impl TelemetrySink for RecordingSink {
    fn publish(&self, status: &Status) {
        self.published.borrow_mut().push(*status);
    }

    fn publish_discovery(&self, _identity: &DeviceIdentity) {}
}

#[derive(Default)]
struct RecordingStore {
    records: Vec<SessionRecord>,
    fail: bool,
}

impl StatsStore for RecordingStore {
    fn append(&mut self, record: &SessionRecord) -> Result<(), StatsError> {
        if self.fail {
            return Err(StatsError::InvalidRow("disk full".to_string()));
        }
        self.records.push(record.clone());
        Ok(())
    }
}

struct ScriptedSampler(VecDeque<ActivityState>);

impl ScriptedSampler {
    fn new(states: &[ActivityState]) -> Self {
        Self(states.iter().copied().collect())
    }
}

impl ActivitySampler for ScriptedSampler {
    fn sample(&mut self) -> ActivityState {
        self.0.pop_front().unwrap_or(ActivityState::Indeterminate)
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap()
}

fn config() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_secs(5),
        idle_reset: Duration::from_secs(300),
        idle_publish_interval: None,
        warmup: Duration::from_secs(5),
        post_reset_pause: Duration::from_secs(5),
    }
}

/// Step `n` times, returning each step's events
fn steps<D: ExerciseDevice, C: Clock>(
    machine: &mut SessionMachine<'_, D, C>,
    n: usize,
) -> Vec<Vec<SessionEvent>> {
    (0..n).map(|_| machine.step().unwrap()).collect()
}

fn closed(events: &[Vec<SessionEvent>]) -> Vec<(usize, SessionRecord)> {
    events
        .iter()
        .enumerate()
        .flat_map(|(i, step)| {
            step.iter().filter_map(move |e| match e {
                SessionEvent::SessionClosed(record) => Some((i + 1, record.clone())),
                _ => None,
            })
        })
        .collect()
}

fn count(events: &[Vec<SessionEvent>], wanted: &SessionEvent) -> usize {
    events.iter().flatten().filter(|e| *e == wanted).count()
}

#[test]
fn test_single_session_closed_after_idle_timeout() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::ride(5);
    let resets = device.resets.clone();
    let mut store = RecordingStore::default();

    let events = {
        let mut machine =
            SessionMachine::new(device, clock.clone(), config()).with_store(&mut store);
        steps(&mut machine, 200)
    };

    // Polls are 5 s apart: use ends at poll 5 (t=20 s); poll 66 (t=325 s)
    // is the first one more than 300 s later.
    let closed = closed(&events);
    assert_eq!(closed.len(), 1);
    let (step, record) = &closed[0];
    assert_eq!(*step, 66);
    assert_eq!(record.start_time, start());
    assert_eq!(record.end_time, start() + TimeDelta::seconds(20));
    assert_eq!(record.distance_km, 2.5);
    assert_eq!(record.energy_kjoule, 200);

    assert_eq!(store.records, vec![record.clone()]);
    assert_eq!(resets.get(), 1);
    assert_eq!(count(&events, &SessionEvent::DeviceReset), 1);
    assert_eq!(
        count(
            &events,
            &SessionEvent::SessionStarted {
                start_time: start()
            }
        ),
        1
    );
}

#[test]
fn test_unused_console_never_records() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(Vec::new());
    let resets = device.resets.clone();
    let sink = RecordingSink::default();
    let mut store = RecordingStore::default();

    let events = {
        let mut machine = SessionMachine::new(device, clock.clone(), config())
            .with_sink(&sink)
            .with_store(&mut store);
        steps(&mut machine, 200)
    };

    assert!(closed(&events).is_empty());
    assert!(store.records.is_empty());
    // Without a sampler the idle timer only runs after a first use
    assert_eq!(resets.get(), 0);
    assert_eq!(sink.published.borrow().len(), 200);
    assert_eq!(clock.now(), start() + TimeDelta::seconds(1000));
}

#[test]
fn test_second_session_after_reset() {
    let clock = ManualClock::new(start());
    let mut script: Vec<Result<Status, ProtocolError>> = vec![Ok(status(15.0, 1.0, 60))];
    // Idle through the timeout (polls 2..=62 at t=5..=305 s), then ride again
    script.extend((0..61).map(|_| Ok(status(0.0, 1.0, 60))));
    script.extend((0..3).map(|_| Ok(status(18.0, 0.3, 70))));
    let device = ScriptedDevice::new(script);
    let mut store = RecordingStore::default();

    let events = {
        let mut machine =
            SessionMachine::new(device, clock.clone(), config()).with_store(&mut store);
        steps(&mut machine, 200)
    };

    let closed = closed(&events);
    assert_eq!(closed.len(), 2);
    assert_eq!(store.records.len(), 2);
    assert_eq!(store.records[0].start_time, store.records[0].end_time);
    assert_eq!(store.records[1].energy_kjoule, 0);
    assert!(store.records[1].start_time > store.records[0].end_time);
}

#[test]
fn test_indeterminate_sampler_never_transitions() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(Vec::new());
    let polls = device.polls.clone();
    let mut sampler = ScriptedSampler::new(&[]);

    let mut machine = SessionMachine::new(device, clock, config()).with_sampler(&mut sampler);
    for _ in 0..50 {
        assert!(machine.step().unwrap().is_empty());
        assert_eq!(machine.phase(), Phase::AwaitingActivity { seen_low: false });
    }
    drop(machine);
    assert_eq!(polls.get(), 0);
}

#[test]
fn test_rising_edge_starts_warm_up() {
    use ActivityState::{High, Indeterminate, Low};

    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(Vec::new());
    let polls = device.polls.clone();
    let mut sampler = ScriptedSampler::new(&[High, Low, Indeterminate, High]);

    let mut machine =
        SessionMachine::new(device, clock.clone(), config()).with_sampler(&mut sampler);

    // A pin already high is not an edge
    machine.step().unwrap();
    assert_eq!(machine.phase(), Phase::AwaitingActivity { seen_low: false });
    machine.step().unwrap();
    assert_eq!(machine.phase(), Phase::AwaitingActivity { seen_low: true });
    machine.step().unwrap();
    assert_eq!(machine.phase(), Phase::AwaitingActivity { seen_low: true });

    assert_eq!(machine.step().unwrap(), vec![SessionEvent::ActivityDetected]);
    assert_eq!(machine.phase(), Phase::WarmingUp);

    assert_eq!(machine.step().unwrap(), vec![SessionEvent::WarmedUp]);
    assert_eq!(machine.phase(), Phase::Polling);
    assert_eq!(clock.now(), start() + TimeDelta::seconds(5));
    drop(machine);
    assert_eq!(polls.get(), 1, "warm-up reads one throwaway status");
}

#[test]
fn test_activated_but_unused_console_resets() {
    use ActivityState::{High, Low};

    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(Vec::new());
    let resets = device.resets.clone();
    let mut sampler = ScriptedSampler::new(&[Low, High]);
    let mut store = RecordingStore::default();

    let events = {
        let mut machine = SessionMachine::new(device, clock.clone(), config())
            .with_sampler(&mut sampler)
            .with_store(&mut store);
        let events = steps(&mut machine, 80);
        assert_eq!(machine.phase(), Phase::AwaitingActivity { seen_low: false });
        events
    };

    assert_eq!(resets.get(), 1);
    assert!(closed(&events).is_empty());
    assert!(store.records.is_empty());
}

#[test]
fn test_idle_publish_interval() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(Vec::new());
    let sink = RecordingSink::default();
    let config = SessionConfig {
        idle_publish_interval: Some(Duration::from_secs(60)),
        ..config()
    };

    let mut machine = SessionMachine::new(device, clock, config).with_sink(&sink);
    // Polls at t=0..=120 s: publishes at t=0 and t=65 only
    steps(&mut machine, 25);
    drop(machine);
    assert_eq!(sink.published.borrow().len(), 2);
}

#[test]
fn test_busy_and_falling_edge_always_published() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(vec![
        Ok(status(10.0, 0.1, 5)),
        Ok(status(12.0, 0.2, 10)),
        Ok(status(0.0, 0.2, 10)),
        Ok(status(0.0, 0.2, 10)),
        Ok(status(0.0, 0.2, 10)),
    ]);
    let sink = RecordingSink::default();
    let config = SessionConfig {
        idle_publish_interval: Some(Duration::from_secs(60)),
        ..config()
    };

    let mut machine = SessionMachine::new(device, clock, config).with_sink(&sink);
    steps(&mut machine, 5);
    drop(machine);

    let speeds: Vec<f64> = sink.published.borrow().iter().map(|s| s.speed_kmph).collect();
    assert_eq!(speeds, vec![10.0, 12.0, 0.0]);
}

#[test]
fn test_store_failure_does_not_stop_loop() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::ride(2);
    let resets = device.resets.clone();
    let mut store = RecordingStore {
        fail: true,
        ..Default::default()
    };

    let events = {
        let mut machine =
            SessionMachine::new(device, clock.clone(), config()).with_store(&mut store);
        steps(&mut machine, 100)
    };

    assert_eq!(closed(&events).len(), 1);
    assert_eq!(resets.get(), 1);
    assert!(store.records.is_empty());
}

#[test]
fn test_protocol_error_ends_run() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(vec![
        Ok(status(0.0, 0.0, 0)),
        Err(ProtocolError::InvalidResponse("garbage".to_string())),
    ]);
    let polls = device.polls.clone();

    let mut machine = SessionMachine::new(device, clock, config());
    assert!(matches!(
        machine.run(),
        Err(ProtocolError::InvalidResponse(_))
    ));
    drop(machine);
    assert_eq!(polls.get(), 2);
}

#[test]
fn test_reset_failure_propagates() {
    let clock = ManualClock::new(start());
    let mut device = ScriptedDevice::ride(1);
    device.fail_reset = true;

    let mut machine = SessionMachine::new(device, clock, config());
    let result = (0..100).try_for_each(|_| machine.step().map(|_| ()));
    assert!(matches!(result, Err(ProtocolError::Device { .. })));
}

#[test]
fn test_stop_flag_set_before_run() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::new(Vec::new());
    let polls = device.polls.clone();

    let mut machine = SessionMachine::new(device, clock, config())
        .with_stop(Arc::new(AtomicBool::new(true)));
    machine.run().unwrap();
    drop(machine);
    assert_eq!(polls.get(), 0);
}

#[test]
fn test_session_lands_in_sqlite() {
    let clock = ManualClock::new(start());
    let device = ScriptedDevice::ride(3);
    let mut store = SqliteStatsStore::open_in_memory().unwrap();

    {
        let mut machine =
            SessionMachine::new(device, clock.clone(), config()).with_store(&mut store);
        steps(&mut machine, 100);
    }

    let records = store.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].start_time, start());
    assert_eq!(records[0].end_time, start() + TimeDelta::seconds(10));
    assert_eq!(records[0].energy_kjoule, 120);
}
