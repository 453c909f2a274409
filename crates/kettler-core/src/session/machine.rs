//! Session state machine
//!
//! One loop covers every deployment: with or without an activity sampler,
//! with or without a stats store. Protocol failures are not handled here;
//! they end the run and the caller decides when to start over.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::clock::{elapsed, Clock};
use super::{Session, SessionConfig, SessionEvent};
use crate::activity::{ActivitySampler, ActivityState};
use crate::protocol::{ExerciseDevice, ProtocolError};
use crate::stats::StatsStore;
use crate::telemetry::TelemetrySink;

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a low-then-high edge on the activity pin
    AwaitingActivity { seen_low: bool },
    /// Activity seen, letting the console wake up
    WarmingUp,
    /// Polling the console
    Polling,
}

/// Drives a console from first poll to idle reset, over and over
pub struct SessionMachine<'a, D, C> {
    device: D,
    clock: C,
    config: SessionConfig,
    sink: Option<&'a dyn TelemetrySink>,
    store: Option<&'a mut dyn StatsStore>,
    sampler: Option<&'a mut dyn ActivitySampler>,
    stop: Arc<AtomicBool>,

    phase: Phase,
    session: Option<Session>,
    /// Reference point for the idle timeout; unset means "never times out"
    idle_since: Option<DateTime<Utc>>,
    was_in_use: bool,
    last_publish: Option<DateTime<Utc>>,
}

impl<'a, D: ExerciseDevice, C: Clock> SessionMachine<'a, D, C> {
    /// Continuous-polling machine without sink or store
    pub fn new(device: D, clock: C, config: SessionConfig) -> Self {
        Self {
            device,
            clock,
            config,
            sink: None,
            store: None,
            sampler: None,
            stop: Arc::new(AtomicBool::new(false)),
            phase: Phase::Polling,
            session: None,
            idle_since: None,
            was_in_use: false,
            last_publish: None,
        }
    }

    /// Forward statuses to `sink`
    pub fn with_sink(mut self, sink: &'a dyn TelemetrySink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record completed sessions in `store`
    pub fn with_store(mut self, store: &'a mut dyn StatsStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Gate polling on the activity pin
    pub fn with_sampler(mut self, sampler: &'a mut dyn ActivitySampler) -> Self {
        self.sampler = Some(sampler);
        self.phase = Phase::AwaitingActivity { seen_low: false };
        self
    }

    /// Stop looping once `stop` is set
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a session is currently open
    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }

    /// Step until the stop flag is set. Returns the first protocol error.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        tracing::info!(
            activity_pin = self.sampler.is_some(),
            stats = self.store.is_some(),
            poll_secs = self.config.poll_interval.as_secs_f64(),
            idle_reset_secs = self.config.idle_reset.as_secs(),
            "Session loop started"
        );
        while !self.stop.load(Ordering::SeqCst) {
            for event in self.step()? {
                tracing::debug!(?event, "Session event");
            }
        }
        tracing::info!("Session loop stopped");
        Ok(())
    }

    /// Perform one iteration of the current phase
    pub fn step(&mut self) -> Result<Vec<SessionEvent>, ProtocolError> {
        let mut events = Vec::new();
        match self.phase {
            Phase::AwaitingActivity { seen_low } => self.await_activity(seen_low, &mut events),
            Phase::WarmingUp => self.warm_up(&mut events)?,
            Phase::Polling => self.poll(&mut events)?,
        }
        Ok(events)
    }

    fn await_activity(&mut self, seen_low: bool, events: &mut Vec<SessionEvent>) {
        let Some(sampler) = self.sampler.as_mut() else {
            self.phase = Phase::Polling;
            return;
        };

        match sampler.sample() {
            ActivityState::Low => self.phase = Phase::AwaitingActivity { seen_low: true },
            ActivityState::High if seen_low => {
                tracing::info!("Activity detected, waking console");
                self.phase = Phase::WarmingUp;
                events.push(SessionEvent::ActivityDetected);
            }
            // High without a preceding low is a pin stuck high, not an edge
            ActivityState::High | ActivityState::Indeterminate => {}
        }
    }

    fn warm_up(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), ProtocolError> {
        self.clock.sleep(self.config.warmup);
        // Throwaway read: only checks that the console answers
        self.device.status()?;

        self.phase = Phase::Polling;
        self.idle_since = Some(self.clock.now());
        self.was_in_use = false;
        self.last_publish = None;
        events.push(SessionEvent::WarmedUp);
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), ProtocolError> {
        let status = self.device.status()?;
        let now = self.clock.now();
        let in_use = status.is_in_use();

        if in_use {
            if !self.was_in_use {
                tracing::info!(speed_kmph = status.speed_kmph, "Console is now in use");
            }
            match self.session.as_mut() {
                Some(session) => session.last_use_time = now,
                None => {
                    self.session = Some(Session {
                        start_time: now,
                        last_use_time: now,
                        latest: status,
                    });
                    events.push(SessionEvent::SessionStarted { start_time: now });
                }
            }
            self.idle_since = Some(now);
        }
        if let Some(session) = self.session.as_mut() {
            session.latest = status;
        }

        let busy = in_use || self.was_in_use;
        if self.should_publish(busy, now) {
            if let Some(sink) = self.sink {
                sink.publish(&status);
            }
            self.last_publish = Some(now);
        }
        self.was_in_use = in_use;

        if let Some(since) = self.idle_since {
            if elapsed(since, now) > self.config.idle_reset {
                return self.idle_timeout(events);
            }
        }

        self.clock.sleep(self.config.poll_interval);
        Ok(())
    }

    fn should_publish(&self, busy: bool, now: DateTime<Utc>) -> bool {
        if self.sampler.is_some() {
            return true;
        }
        match self.config.idle_publish_interval {
            None => true,
            Some(_) if busy => true,
            Some(interval) => self
                .last_publish
                .map_or(true, |last| elapsed(last, now) > interval),
        }
    }

    fn idle_timeout(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), ProtocolError> {
        if let Some(session) = self.session.take() {
            let record = session.into_record();
            tracing::info!(
                start = %record.start_time,
                end = %record.end_time,
                distance_km = record.distance_km,
                energy_kjoule = record.energy_kjoule,
                "Session closed"
            );
            if let Some(store) = self.store.as_mut() {
                if let Err(e) = store.append(&record) {
                    tracing::error!(error = %e, "Could not store session stats (continuing)");
                }
            }
            events.push(SessionEvent::SessionClosed(record));
        }

        tracing::info!("Console idle, resetting");
        self.device.reset()?;
        events.push(SessionEvent::DeviceReset);
        self.clock.sleep(self.config.post_reset_pause);

        self.idle_since = None;
        self.was_in_use = false;
        self.last_publish = None;
        self.phase = if self.sampler.is_some() {
            Phase::AwaitingActivity { seen_low: false }
        } else {
            Phase::Polling
        };
        Ok(())
    }
}
