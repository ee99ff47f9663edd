//! Single-device register exchanges on a half-duplex bus.

use std::time::Duration;

use tracing::{debug, trace};

use crate::device::ReadRequest;
use crate::error::ProtocolError;

/// Register-level transport to the field devices.
///
/// Implementations own framing and the wire; the executor only decides
/// when to address, send, and collect.
pub trait RegisterLink {
    /// Point the link at a different device address.
    fn select(&mut self, address: u8);

    /// Wait for the bus to settle after re-addressing.
    fn settle(&mut self, delay: Duration) {
        let _ = delay;
    }

    /// Put a read request on the wire.
    fn send_read(&mut self, request: &ReadRequest) -> Result<(), ProtocolError>;

    /// Collect the response to the last request, if it has arrived.
    ///
    /// Must not block beyond a short bounded read.
    fn poll_response(&mut self) -> Option<Result<Vec<u16>, ProtocolError>>;

    /// Drop any response still owed for the last request.
    fn cancel(&mut self) {}
}

/// Driver for the transceiver direction pin (DE/RE).
pub trait DirectionControl {
    fn set_transmit(&mut self, enabled: bool);
}

impl<L: RegisterLink + ?Sized> RegisterLink for Box<L> {
    fn select(&mut self, address: u8) {
        (**self).select(address)
    }

    fn settle(&mut self, delay: Duration) {
        (**self).settle(delay)
    }

    fn send_read(&mut self, request: &ReadRequest) -> Result<(), ProtocolError> {
        (**self).send_read(request)
    }

    fn poll_response(&mut self) -> Option<Result<Vec<u16>, ProtocolError>> {
        (**self).poll_response()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

impl<D: DirectionControl + ?Sized> DirectionControl for Box<D> {
    fn set_transmit(&mut self, enabled: bool) {
        (**self).set_transmit(enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    Idle,
    AwaitingResponse,
    SendFailed(ProtocolError),
}

/// Performs one request/response exchange at a time.
///
/// Remembers the last addressed device so re-addressing (and its settle
/// delay) is only paid when the target changes. Never retries.
pub struct TransactionExecutor<L, D> {
    link: L,
    direction: D,
    settle_delay: Duration,
    last_address: Option<u8>,
    exchange: Exchange,
}

impl<L: RegisterLink, D: DirectionControl> TransactionExecutor<L, D> {
    pub fn new(link: L, direction: D, settle_delay: Duration) -> Self {
        Self {
            link,
            direction,
            settle_delay,
            last_address: None,
            exchange: Exchange::Idle,
        }
    }

    /// Start an exchange. The outcome is collected with [`poll`](Self::poll).
    ///
    /// Transmit is enabled only around the send and is always released,
    /// whether the send succeeded or not.
    pub fn begin(&mut self, request: &ReadRequest) {
        if self.last_address != Some(request.address) {
            debug!(
                address = request.address,
                previous = ?self.last_address,
                "Re-addressing bus"
            );
            self.link.select(request.address);
            self.link.settle(self.settle_delay);
            self.last_address = Some(request.address);
        }

        self.direction.set_transmit(true);
        let sent = self.link.send_read(request);
        self.direction.set_transmit(false);

        self.exchange = match sent {
            Ok(()) => {
                trace!(
                    address = request.address,
                    start = request.register_start,
                    count = request.count(),
                    "Read request sent"
                );
                Exchange::AwaitingResponse
            }
            Err(e) => Exchange::SendFailed(e),
        };
    }

    /// Collect the outcome of the current exchange.
    ///
    /// Returns `None` while the response is still outstanding or when no
    /// exchange is in progress.
    pub fn poll(&mut self) -> Option<Result<Vec<u16>, ProtocolError>> {
        match self.exchange {
            Exchange::Idle => None,
            Exchange::SendFailed(e) => {
                self.exchange = Exchange::Idle;
                Some(Err(e))
            }
            Exchange::AwaitingResponse => {
                let outcome = self.link.poll_response()?;
                self.exchange = Exchange::Idle;
                Some(outcome)
            }
        }
    }

    /// Give up on the current exchange; a late response is discarded.
    pub fn abandon(&mut self) {
        if self.exchange == Exchange::AwaitingResponse {
            self.link.cancel();
        }
        self.exchange = Exchange::Idle;
    }

    /// One-shot exchange for links that answer within the send/poll pair.
    ///
    /// A response that has not arrived by the first poll is reported as
    /// [`ProtocolError::RESPONSE_TIMED_OUT`].
    pub fn execute(&mut self, request: &ReadRequest) -> Result<Vec<u16>, ProtocolError> {
        self.begin(request);
        match self.poll() {
            Some(outcome) => outcome,
            None => {
                self.abandon();
                Err(ProtocolError::RESPONSE_TIMED_OUT)
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.exchange != Exchange::Idle
    }

    pub fn last_address(&self) -> Option<u8> {
        self.last_address
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn direction(&self) -> &D {
        &self.direction
    }
}
