//! Error types for the polling engine.

use std::fmt;

use thiserror::Error;

use crate::scheduler::Phase;

/// Configuration errors raised by registry edits.
///
/// All of these are rejected synchronously and leave the registry untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another device already uses this bus address.
    #[error("Device id {0} is already registered")]
    DuplicateId(u8),

    /// Another device already uses this name.
    #[error("Device name '{0}' is already registered")]
    DuplicateName(String),

    /// The registry is full.
    #[error("Registry capacity of {0} devices exceeded")]
    CapacityExceeded(usize),

    /// A device must read at least one register.
    #[error("Device '{0}' must read at least one register")]
    ZeroRegisters(String),

    /// Bus addresses are 1-247; 0 is the broadcast address.
    #[error("Device id {0} is not a valid bus address (1-247)")]
    InvalidAddress(u8),

    /// Device names are report keys and cannot be empty.
    #[error("Device name cannot be empty")]
    EmptyName,

    /// No device with this id.
    #[error("Device id {0} not found")]
    NotFound(u8),

    /// Edits are rejected while a batch owns the bus.
    #[error("Registry cannot be edited while a batch is running")]
    BatchRunning,
}

/// Why a batch could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("Cannot start a batch while the scheduler is {0}")]
    NotIdle(Phase),
    #[error("Cannot start a batch with an empty registry")]
    EmptyRegistry,
}

/// Returned when `reset` is called while a batch is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cannot reset while a batch is running")]
pub struct ResetError;

/// A failed register exchange, identified by its one-byte result code.
///
/// Codes `0x01..=0x04` are device exceptions; codes `0xE0..=0xE3` are
/// master-side failures (the device never produced a usable answer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolError {
    pub code: u8,
}

impl ProtocolError {
    pub const ILLEGAL_FUNCTION: Self = Self::new(0x01);
    pub const ILLEGAL_DATA_ADDRESS: Self = Self::new(0x02);
    pub const ILLEGAL_DATA_VALUE: Self = Self::new(0x03);
    pub const DEVICE_FAILURE: Self = Self::new(0x04);
    pub const INVALID_SLAVE_ID: Self = Self::new(0xE0);
    pub const INVALID_FUNCTION: Self = Self::new(0xE1);
    pub const RESPONSE_TIMED_OUT: Self = Self::new(0xE2);
    pub const INVALID_FRAME: Self = Self::new(0xE3);

    pub const fn new(code: u8) -> Self {
        Self { code }
    }

    /// Fixed-width hex tag, e.g. `0xE2`.
    pub fn tag(&self) -> String {
        format!("0x{:02X}", self.code)
    }

    /// Short description of well-known codes.
    pub fn describe(&self) -> &'static str {
        match self.code {
            0x01 => "illegal function",
            0x02 => "illegal data address",
            0x03 => "illegal data value",
            0x04 => "device failure",
            0xE0 => "invalid slave id",
            0xE1 => "invalid function",
            0xE2 => "response timed out",
            0xE3 => "invalid frame",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag(), self.describe())
    }
}

impl std::error::Error for ProtocolError {}
