//! Register decoding for the field sensor protocol.
//!
//! The field devices publish a fixed layout, and this module decodes that
//! layout only:
//!
//! | register | reading       | encoding                               |
//! |----------|---------------|----------------------------------------|
//! | 0        | `temperature` | signed 16-bit, two's complement, x 0.1 |
//! | 1        | `humidity`    | unsigned 16-bit, x 0.1                 |
//! | n >= 2   | `reg{n}`      | raw unsigned 16-bit                    |
//!
//! A device using a different layout still gets its first two registers
//! labeled as temperature and humidity. That is a known limitation of the
//! protocol contract and is not special-cased.

use serde::Serialize;

/// Fixed-point scale of the first two registers.
pub const FIXED_POINT_SCALE: f64 = 0.1;

pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";

/// A decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    /// Fixed-point value after scaling.
    Scaled(f64),
    /// Register passed through unchanged.
    Raw(u16),
}

impl ReadingValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ReadingValue::Scaled(v) => *v,
            ReadingValue::Raw(v) => f64::from(*v),
        }
    }
}

/// A named reading from one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub name: String,
    pub value: ReadingValue,
}

impl Reading {
    fn new(name: impl Into<String>, value: ReadingValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Signed fixed-point: two's complement of the 16-bit field, x 0.1.
pub fn signed_fixed_point(raw: u16) -> f64 {
    f64::from(raw as i16) * FIXED_POINT_SCALE
}

/// Unsigned fixed-point: raw x 0.1.
pub fn unsigned_fixed_point(raw: u16) -> f64 {
    f64::from(raw) * FIXED_POINT_SCALE
}

/// Decode a register block into readings, in register order.
///
/// Short blocks decode as far as they go; an empty block yields no readings.
pub fn decode(raw: &[u16]) -> Vec<Reading> {
    raw.iter()
        .enumerate()
        .map(|(index, &value)| match index {
            0 => Reading::new(TEMPERATURE, ReadingValue::Scaled(signed_fixed_point(value))),
            1 => Reading::new(HUMIDITY, ReadingValue::Scaled(unsigned_fixed_point(value))),
            n => Reading::new(format!("reg{}", n), ReadingValue::Raw(value)),
        })
        .collect()
}
