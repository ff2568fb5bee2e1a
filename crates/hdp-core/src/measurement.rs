//! Blood-pressure measurement extraction from fixed-report data exports.
//!
//! The device does not describe its report with a usable object model, so the
//! fields are read from fixed offsets into the full frame (header included).
//! The offsets live in [`ReportLayout`] so another device variant only needs a
//! new layout.

use std::fmt;

use thiserror::Error;

use crate::protocol::hex::to_hex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Frame too short for a fixed report: need {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
}

/// One cuff reading.
///
/// The timestamp fields are the hex rendering of the raw bytes, not a decoded
/// calendar value: `[0x20, 0x24]` becomes `"2024"`, `0x0F` becomes `"0F"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub systolic: u8,
    pub diastolic: u8,
    pub pulse: u8,
    pub year_hex: String,
    pub month_hex: String,
    pub day_hex: String,
    pub hour_hex: String,
    pub minute_hex: String,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Systolic = {}, Diastolic = {}, Pulse = {} at {}-{}-{} {}:{}",
            self.systolic,
            self.diastolic,
            self.pulse,
            self.year_hex,
            self.month_hex,
            self.day_hex,
            self.hour_hex,
            self.minute_hex
        )
    }
}

/// Frame offsets of the fields inside a fixed report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    pub systolic: usize,
    pub diastolic: usize,
    pub pulse: usize,
    /// Two bytes.
    pub year: usize,
    pub month: usize,
    pub day: usize,
    pub hour: usize,
    pub minute: usize,
    /// Frames shorter than this are rejected.
    pub min_len: usize,
}

impl ReportLayout {
    /// Layout observed on the supported blood-pressure cuffs.
    pub const BLOOD_PRESSURE: ReportLayout = ReportLayout {
        systolic: 45,
        diastolic: 47,
        pulse: 63,
        year: 50,
        month: 52,
        day: 53,
        hour: 54,
        minute: 55,
        min_len: 56,
    };

    /// Extract a measurement from full frame bytes.
    ///
    /// Fields beyond `min_len` that the frame does not reach read as zero,
    /// matching a zero-filled receive buffer.
    pub fn extract(&self, frame: &[u8]) -> Result<Measurement, ExtractError> {
        if frame.len() < self.min_len {
            return Err(ExtractError::FrameTooShort {
                expected: self.min_len,
                actual: frame.len(),
            });
        }
        let byte = |offset: usize| frame.get(offset).copied().unwrap_or(0);

        Ok(Measurement {
            systolic: byte(self.systolic),
            diastolic: byte(self.diastolic),
            pulse: byte(self.pulse),
            year_hex: to_hex(&[byte(self.year), byte(self.year + 1)]),
            month_hex: to_hex(&[byte(self.month)]),
            day_hex: to_hex(&[byte(self.day)]),
            hour_hex: to_hex(&[byte(self.hour)]),
            minute_hex: to_hex(&[byte(self.minute)]),
        })
    }
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self::BLOOD_PRESSURE
    }
}

/// Extract a measurement using the blood-pressure layout.
pub fn extract(frame: &[u8]) -> Result<Measurement, ExtractError> {
    ReportLayout::BLOOD_PRESSURE.extract(frame)
}
