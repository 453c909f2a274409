//! Demo Mode - Simulated Kettler console
//!
//! Answers the console protocol over an in-memory [`Channel`] so the bridge
//! can run without hardware. The rider alternates between riding stretches
//! and rests at random intervals.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crate::protocol::{Channel, Command, Status, ERROR_TOKEN, LINE_TERMINATOR};

/// Rider model producing exercise status values
pub struct RiderSimulator {
    /// Last update time (ms)
    last_update_ms: u64,
    /// Current ride/rest phase
    phase: RidePhase,
    /// Cadence the rider is aiming for in the current stretch
    target_rpm: f64,
    /// Smoothed cadence
    current_rpm: f64,
    /// Accumulated counters, as the console keeps them
    distance_m: f64,
    energy_j: f64,
    active_ms: u64,
    /// Target power set with `PW`
    dest_power_watt: i32,
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RidePhase {
    /// Pedalling until `until_ms`
    Riding { until_ms: u64 },
    /// Sitting still until `until_ms`
    Resting { until_ms: u64 },
}

impl Default for RiderSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl RiderSimulator {
    /// Create a simulator seeded from entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a reproducible simulator
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let first_ride = rng.gen_range(60_000..180_000);
        let target_rpm = rng.gen_range(60.0..90.0);
        Self {
            last_update_ms: 0,
            phase: RidePhase::Riding {
                until_ms: first_ride,
            },
            target_rpm,
            current_rpm: 0.0,
            distance_m: 0.0,
            energy_j: 0.0,
            active_ms: 0,
            dest_power_watt: 100,
            rng,
        }
    }

    /// Advance the model to `elapsed_ms` since start and return the status
    pub fn update(&mut self, elapsed_ms: u64) -> Status {
        let delta_ms = elapsed_ms.saturating_sub(self.last_update_ms);
        self.last_update_ms = elapsed_ms;

        self.update_phase(elapsed_ms);

        let target = match self.phase {
            RidePhase::Riding { .. } => self.target_rpm,
            RidePhase::Resting { .. } => 0.0,
        };
        // Cadence follows the target within a couple of seconds
        let max_change = 30.0 * (delta_ms as f64 / 1000.0);
        self.current_rpm += (target - self.current_rpm).clamp(-max_change, max_change);
        if self.current_rpm < 1.0 {
            self.current_rpm = 0.0;
        }

        // Roughly 0.35 km/h per rpm on an ergometer flywheel
        let speed_kmph = (self.current_rpm * 0.35 * 10.0).round() / 10.0;
        let real_power = if self.current_rpm > 0.0 {
            f64::from(self.dest_power_watt) * (self.current_rpm / 70.0).min(1.3)
        } else {
            0.0
        };

        let dt = delta_ms as f64 / 1000.0;
        if speed_kmph > 0.0 {
            self.active_ms += delta_ms;
            self.distance_m += speed_kmph / 3.6 * dt;
            // Human efficiency is about a quarter of the burned energy
            self.energy_j += real_power * dt * 4.0;
        }

        let heart_rate = if self.current_rpm > 0.0 {
            90 + (self.current_rpm * 0.6) as u32
        } else {
            0
        };

        Status {
            heart_rate_bpm: heart_rate,
            exercise_rpm: self.current_rpm.round() as u32,
            speed_kmph,
            distance_km: (self.distance_m / 100.0).floor() / 10.0,
            dest_power_watt: self.dest_power_watt,
            energy_kjoule: (self.energy_j / 1000.0) as u32,
            time_elapsed_sec: (self.active_ms / 1000) as u32,
            real_power_watt: real_power.round() as i32,
        }
    }

    fn update_phase(&mut self, now_ms: u64) {
        match self.phase {
            RidePhase::Riding { until_ms } if now_ms >= until_ms => {
                let rest = self.rng.gen_range(30_000..120_000);
                self.phase = RidePhase::Resting {
                    until_ms: now_ms + rest,
                };
            }
            RidePhase::Resting { until_ms } if now_ms >= until_ms => {
                let ride = self.rng.gen_range(60_000..180_000);
                self.target_rpm = self.rng.gen_range(60.0..90.0);
                self.phase = RidePhase::Riding {
                    until_ms: now_ms + ride,
                };
            }
            _ => {}
        }
    }

    /// Clear the counters, as `RS` does on the console
    pub fn reset_counters(&mut self) {
        self.distance_m = 0.0;
        self.energy_j = 0.0;
        self.active_ms = 0;
        self.dest_power_watt = 100;
    }
}

/// In-memory console speaking the line protocol
pub struct SimulatedConsole {
    rider: RiderSimulator,
    started: Instant,
    /// Bytes written by the client, waiting for a line terminator
    input: Vec<u8>,
    /// Response bytes waiting to be read
    output: VecDeque<u8>,
}

impl Default for SimulatedConsole {
    fn default() -> Self {
        Self::new(RiderSimulator::new())
    }
}

impl SimulatedConsole {
    pub fn new(rider: RiderSimulator) -> Self {
        Self {
            rider,
            started: Instant::now(),
            input: Vec::new(),
            output: VecDeque::new(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn respond(&mut self, line: &str) -> String {
        let (token, param) = match line.split_once(' ') {
            Some((token, param)) => (token, Some(param)),
            None => (line, None),
        };

        let ack = || "ACK".to_string();
        match (Command::from_token(token), param) {
            (Some(Command::DeviceId), None) => "SIM-KETTLER".to_string(),
            (Some(Command::DeviceModel), None) => "SIM UNIX E".to_string(),
            (Some(Command::SerialNumber), None) => "00000001".to_string(),
            (Some(Command::Version), None) => "117".to_string(),
            (Some(Command::DeviceTime), None) => {
                let secs = self.elapsed_ms() / 1000;
                format!("{:02}:{:02}", (secs / 60) % 60, secs % 60)
            }
            (Some(Command::Status), None) => {
                let now = self.elapsed_ms();
                self.rider.update(now).to_wire()
            }
            (Some(Command::StatusAlternative), None) => {
                let now = self.elapsed_ms();
                format!("0\t0\t0\t0\t{}", self.rider.update(now).to_wire())
            }
            (Some(Command::Reset), None) => {
                self.rider.reset_counters();
                ack()
            }
            (Some(Command::CommandMode), None) => ack(),
            (Some(Command::PutWatts), Some(p)) => match p.parse::<u32>() {
                // The console clamps to 25..=400 W
                Ok(w) => {
                    self.rider.dest_power_watt = w.clamp(25, 400) as i32;
                    ack()
                }
                Err(_) => ERROR_TOKEN.to_string(),
            },
            (Some(Command::PutDistance), Some(p)) | (Some(Command::PutTime), Some(p))
                if p.parse::<u32>().is_ok() =>
            {
                ack()
            }
            _ => ERROR_TOKEN.to_string(),
        }
    }
}

impl Read for SimulatedConsole {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedConsole {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.input.extend_from_slice(buf);
        while let Some(pos) = self
            .input
            .windows(LINE_TERMINATOR.len())
            .position(|w| w == LINE_TERMINATOR)
        {
            let line: Vec<u8> = self.input.drain(..pos + LINE_TERMINATOR.len()).collect();
            let text = String::from_utf8_lossy(&line[..pos]).into_owned();
            let response = self.respond(&text);
            self.output.extend(response.as_bytes());
            self.output.extend(LINE_TERMINATOR);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for SimulatedConsole {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.output.clear();
        Ok(())
    }
}
