//! Exercise status decoding
//!
//! The `ST` response is a single line of 8 tab separated fields. `ES1`
//! returns 12 fields; the first 4 are undocumented and skipped.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProtocolError;

/// Number of fields in an `ST` response
pub const STATUS_FIELDS: usize = 8;

/// Number of fields in an `ES1` response
pub const STATUS_ALTERNATIVE_FIELDS: usize = 12;

/// Snapshot of one status poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub heart_rate_bpm: u32,
    pub exercise_rpm: u32,
    /// km/h, one decimal (wire value is tenths)
    pub speed_kmph: f64,
    /// km, one decimal (wire value is tenths)
    pub distance_km: f64,
    /// May be negative
    pub dest_power_watt: i32,
    pub energy_kjoule: u32,
    /// Decoded from "MM:SS"
    pub time_elapsed_sec: u32,
    pub real_power_watt: i32,
}

impl Status {
    /// Decode an `ST` response line
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = raw.split('\t').collect();
        Self::from_fields(&fields, raw)
    }

    /// Decode an `ES1` response line
    pub fn parse_alternative(raw: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = raw.split('\t').collect();
        if fields.len() != STATUS_ALTERNATIVE_FIELDS {
            return Err(ProtocolError::InvalidResponse(raw.to_string()));
        }
        Self::from_fields(&fields[STATUS_ALTERNATIVE_FIELDS - STATUS_FIELDS..], raw)
    }

    /// Decode the 8 status fields; `raw` is kept for the error message
    fn from_fields(fields: &[&str], raw: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidResponse(raw.to_string());

        if fields.len() != STATUS_FIELDS {
            return Err(invalid());
        }

        let int = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid());
        let signed = |s: &str| s.trim().parse::<i32>().map_err(|_| invalid());
        let tenths = |s: &str| int(s).map(|v| f64::from(v) / 10.0);

        Ok(Self {
            heart_rate_bpm: int(fields[0])?,
            exercise_rpm: int(fields[1])?,
            speed_kmph: tenths(fields[2])?,
            distance_km: tenths(fields[3])?,
            dest_power_watt: signed(fields[4])?,
            energy_kjoule: int(fields[5])?,
            time_elapsed_sec: parse_mm_ss(fields[6]).ok_or_else(invalid)?,
            real_power_watt: signed(fields[7])?,
        })
    }

    /// Whether the equipment is being used right now
    pub fn is_in_use(&self) -> bool {
        self.speed_kmph > 0.0
    }

    /// Encode back into an `ST` response line
    pub fn to_wire(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{:02}:{:02}\t{}",
            self.heart_rate_bpm,
            self.exercise_rpm,
            (self.speed_kmph * 10.0).round() as u32,
            (self.distance_km * 10.0).round() as u32,
            self.dest_power_watt,
            self.energy_kjoule,
            self.time_elapsed_sec / 60,
            self.time_elapsed_sec % 60,
            self.real_power_watt,
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Heart rate: {}bpm, RPM: {}, Speed: {:.1}km/h, Distance: {:.1}km, Dest power: {}W, \
             Energy: {}kJ, Time: {}s, Real power: {}W",
            self.heart_rate_bpm,
            self.exercise_rpm,
            self.speed_kmph,
            self.distance_km,
            self.dest_power_watt,
            self.energy_kjoule,
            self.time_elapsed_sec,
            self.real_power_watt
        )
    }
}

/// Parse "MM:SS" into seconds
fn parse_mm_ss(s: &str) -> Option<u32> {
    let (mm, ss) = s.trim().split_once(':')?;
    let minutes: u32 = mm.parse().ok()?;
    let seconds: u32 = ss.parse().ok()?;
    minutes.checked_mul(60)?.checked_add(seconds)
}

/// Identity strings read once when the client is opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_model: String,
    pub serial_number: String,
    pub version: String,
}
