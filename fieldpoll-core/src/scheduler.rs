//! Cooperative polling state machine.
//!
//! The host calls [`Scheduler::advance`] repeatedly with the current time.
//! Each call does at most one unit of bus work and returns immediately:
//!
//! ```text
//!   Idle --start_batch--> Running --advance--> Complete | Failed --reset--> Idle
//! ```
//!
//! The scheduler never resets itself. A terminal phase stays visible until
//! the host has consumed the results and called [`Scheduler::reset`].

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::device::{DeviceDescriptor, ReadRequest};
use crate::error::{ResetError, StartError};
use crate::executor::{DirectionControl, RegisterLink, TransactionExecutor};
use crate::registry::DeviceRegistry;
use crate::result::DeviceResult;

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Running,
    Complete,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// `Complete` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeout budgets. The two are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for one device, from request start to recorded result.
    pub device: Duration,
    /// Budget for the whole batch, from `start_batch`.
    pub batch: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            device: Duration::from_secs(3),
            batch: Duration::from_secs(30),
        }
    }
}

/// What a single `advance` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// No batch is running; nothing was done.
    NotRunning,
    /// The batch budget ran out; the batch is now `Failed`.
    BatchTimedOut,
    /// Every device has a result; the batch is now `Complete`.
    Completed,
    /// A request was sent to the device at `index`.
    Started { index: usize },
    /// Still waiting for the device at `index`.
    Waiting { index: usize },
    /// The device at `index` ran out of time and was recorded as a timeout.
    DeviceTimedOut { index: usize },
    /// The device at `index` answered and its result was recorded.
    Recorded { index: usize },
}

/// Batch progress as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

struct Batch {
    snapshot: Vec<(DeviceDescriptor, ReadRequest)>,
    cursor: usize,
    started_at: Instant,
    device_started_at: Option<Instant>,
    results: Vec<DeviceResult>,
}

impl Batch {
    fn finish_device(&mut self, result: DeviceResult) {
        self.results.push(result);
        self.cursor += 1;
        self.device_started_at = None;
    }
}

/// The polling state machine.
pub struct Scheduler {
    phase: Phase,
    timeouts: Timeouts,
    batch: Option<Batch>,
}

impl Scheduler {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            phase: Phase::Idle,
            timeouts,
            batch: None,
        }
    }

    /// Snapshot the registry and start a batch.
    ///
    /// Returns the number of devices in the batch. Fails without changing
    /// anything when not `Idle` or when the registry is empty.
    pub fn start_batch(
        &mut self,
        registry: &DeviceRegistry,
        now: Instant,
    ) -> Result<usize, StartError> {
        if self.phase != Phase::Idle {
            return Err(StartError::NotIdle(self.phase));
        }
        if registry.is_empty() {
            return Err(StartError::EmptyRegistry);
        }

        let snapshot: Vec<_> = registry
            .entries()
            .map(|(device, request)| (device.clone(), request))
            .collect();

        let total = snapshot.len();
        self.batch = Some(Batch {
            snapshot,
            cursor: 0,
            started_at: now,
            device_started_at: None,
            results: Vec::with_capacity(total),
        });
        self.phase = Phase::Running;

        info!(devices = total, "Batch started");
        Ok(total)
    }

    /// Do at most one unit of work.
    ///
    /// Checks run in a fixed order: batch timeout, end of snapshot, start of
    /// the next device, device timeout, device outcome. Because the device
    /// timeout is checked before the outcome, a response that is ready
    /// exactly at the deadline is recorded as a timeout.
    pub fn advance<L, D>(
        &mut self,
        executor: &mut TransactionExecutor<L, D>,
        now: Instant,
    ) -> Advance
    where
        L: RegisterLink,
        D: DirectionControl,
    {
        if self.phase != Phase::Running {
            return Advance::NotRunning;
        }
        let Some(batch) = self.batch.as_mut() else {
            return Advance::NotRunning;
        };

        let elapsed = now.saturating_duration_since(batch.started_at);
        if elapsed > self.timeouts.batch {
            if batch.device_started_at.take().is_some() {
                executor.abandon();
            }
            self.phase = Phase::Failed;
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                completed = batch.results.len(),
                total = batch.snapshot.len(),
                "Batch timed out, keeping partial results"
            );
            return Advance::BatchTimedOut;
        }

        if batch.cursor >= batch.snapshot.len() {
            self.phase = Phase::Complete;
            info!(
                devices = batch.results.len(),
                succeeded = batch.results.iter().filter(|r| r.outcome.is_success()).count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Batch complete"
            );
            return Advance::Completed;
        }

        let index = batch.cursor;
        let (device, request) = &batch.snapshot[index];

        let Some(device_started_at) = batch.device_started_at else {
            debug!(index, id = device.id, name = %device.name, "Querying device");
            batch.device_started_at = Some(now);
            executor.begin(request);
            return Advance::Started { index };
        };

        if now.saturating_duration_since(device_started_at) >= self.timeouts.device {
            warn!(id = device.id, name = %device.name, "Device timed out, skipping");
            let result = DeviceResult::timeout(device);
            executor.abandon();
            batch.finish_device(result);
            return Advance::DeviceTimedOut { index };
        }

        let result = match executor.poll() {
            None => return Advance::Waiting { index },
            Some(Ok(raw)) => {
                debug!(id = device.id, name = %device.name, registers = raw.len(), "Device answered");
                DeviceResult::success(device, &raw)
            }
            Some(Err(e)) => {
                warn!(id = device.id, name = %device.name, error = %e, "Device failed");
                DeviceResult::protocol_error(device, e)
            }
        };
        batch.finish_device(result);
        Advance::Recorded { index }
    }

    /// Abort a running batch. Results recorded so far are kept.
    ///
    /// Returns `false` when no batch was running.
    pub fn cancel<L, D>(&mut self, executor: &mut TransactionExecutor<L, D>) -> bool
    where
        L: RegisterLink,
        D: DirectionControl,
    {
        if self.phase != Phase::Running {
            return false;
        }
        if let Some(batch) = self.batch.as_mut() {
            if batch.device_started_at.take().is_some() {
                executor.abandon();
            }
        }
        self.phase = Phase::Failed;
        info!("Batch cancelled");
        true
    }

    /// Return to `Idle`, dropping the finished batch.
    ///
    /// Calling it again from `Idle` is a no-op.
    pub fn reset(&mut self) -> Result<(), ResetError> {
        if self.phase == Phase::Running {
            return Err(ResetError);
        }
        if self.phase.is_terminal() {
            debug!(phase = %self.phase, "Scheduler reset");
        }
        self.phase = Phase::Idle;
        self.batch = None;
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Results recorded so far, in snapshot order.
    pub fn results(&self) -> &[DeviceResult] {
        self.batch
            .as_ref()
            .map(|b| b.results.as_slice())
            .unwrap_or_default()
    }

    /// Devices of the current batch, in polling order.
    pub fn snapshot(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.batch
            .iter()
            .flat_map(|b| b.snapshot.iter().map(|(device, _)| device))
    }

    pub fn progress(&self) -> Progress {
        match &self.batch {
            Some(batch) => Progress {
                completed: batch.results.len(),
                total: batch.snapshot.len(),
            },
            None => Progress {
                completed: 0,
                total: 0,
            },
        }
    }
}
