//! Modbus register link over RTU (serial) or TCP.
//!
//! Each read runs as a spawned task bounded by the response timeout plus
//! any settle delay, lock wait included. The outcome comes back over a
//! oneshot channel, so `poll_response` never blocks the host loop. Tasks
//! share one client context behind an async mutex, which keeps exchanges on
//! the wire strictly one at a time even when an abandoned read is still
//! finishing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fieldpoll_core::{DirectionControl, ProtocolError, ReadRequest, RegisterLink};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, trace};

use crate::config::{BusConfig, ConnectionConfig};
use crate::error::{BridgeError, Result};

/// Open the bus described by the configuration.
///
/// The context starts out addressed to the broadcast unit; the executor
/// selects the real device before the first read.
pub async fn connect(connection: &ConnectionConfig, timeout: Duration) -> Result<Context> {
    let slave = Slave(0);

    match connection {
        ConnectionConfig::Tcp { host, port } => {
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .map_err(|e| BridgeError::connection(format!("Invalid address: {}", e)))?;

            let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                .await
                .map_err(|_| BridgeError::connection("Connection timeout"))?
                .map_err(|e| BridgeError::connection(e.to_string()))?;

            Ok(ctx)
        }
        ConnectionConfig::Rtu {
            port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        } => {
            let parity = match parity.to_lowercase().as_str() {
                "even" => tokio_serial::Parity::Even,
                "odd" => tokio_serial::Parity::Odd,
                _ => tokio_serial::Parity::None,
            };

            let stop_bits = match stop_bits {
                2 => tokio_serial::StopBits::Two,
                _ => tokio_serial::StopBits::One,
            };

            let data_bits = match data_bits {
                5 => tokio_serial::DataBits::Five,
                6 => tokio_serial::DataBits::Six,
                7 => tokio_serial::DataBits::Seven,
                _ => tokio_serial::DataBits::Eight,
            };

            let builder = tokio_serial::new(port, *baud_rate)
                .parity(parity)
                .stop_bits(stop_bits)
                .data_bits(data_bits);

            let serial = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| BridgeError::connection(format!("Serial open failed: {}", e)))?;

            Ok(rtu::attach_slave(serial, slave))
        }
    }
}

type Outcome = std::result::Result<Vec<u16>, ProtocolError>;

/// [`RegisterLink`] backed by a `tokio-modbus` client.
pub struct ModbusLink {
    ctx: Arc<Mutex<Context>>,
    runtime: Handle,
    response_timeout: Duration,
    readdress: Option<Slave>,
    settle: Duration,
    pending: Option<oneshot::Receiver<Outcome>>,
}

impl ModbusLink {
    /// Wrap a connected context. Must be called from within a tokio runtime.
    pub fn new(ctx: Context, bus: &BusConfig) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            runtime: Handle::current(),
            response_timeout: Duration::from_millis(bus.response_timeout_ms),
            readdress: None,
            settle: Duration::ZERO,
            pending: None,
        }
    }
}

impl RegisterLink for ModbusLink {
    fn select(&mut self, address: u8) {
        self.readdress = Some(Slave(address));
    }

    /// Deferred: the next transaction task sleeps before its request.
    fn settle(&mut self, delay: Duration) {
        self.settle = delay;
    }

    fn send_read(&mut self, request: &ReadRequest) -> std::result::Result<(), ProtocolError> {
        let (tx, rx) = oneshot::channel();
        let ctx = Arc::clone(&self.ctx);
        let readdress = self.readdress.take();
        let settle = std::mem::take(&mut self.settle);
        let budget = self.response_timeout + settle;
        let start = request.register_start;
        let count = request.count();

        self.runtime.spawn(async move {
            // Waiting for a previous read to release the bus counts against
            // this read's budget.
            let exchange = async {
                let mut ctx = ctx.lock().await;
                if let Some(slave) = readdress {
                    ctx.set_slave(slave);
                    if !settle.is_zero() {
                        tokio::time::sleep(settle).await;
                    }
                }
                ctx.read_input_registers(start, count).await
            };

            let outcome = match tokio::time::timeout(budget, exchange).await {
                Err(_) => Err(ProtocolError::RESPONSE_TIMED_OUT),
                Ok(Err(e)) => Err(transport_error(&e)),
                Ok(Ok(Err(exception))) => Err(exception_error(exception)),
                Ok(Ok(Ok(values))) => Ok(values),
            };

            trace!(start, count, ok = outcome.is_ok(), "Read finished");

            // The receiver is gone when the scheduler abandoned this read.
            let _ = tx.send(outcome);
        });

        self.pending = Some(rx);
        Ok(())
    }

    fn poll_response(&mut self) -> Option<Outcome> {
        let rx = self.pending.as_mut()?;
        match rx.try_recv() {
            Ok(outcome) => {
                self.pending = None;
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.pending = None;
                Some(Err(ProtocolError::RESPONSE_TIMED_OUT))
            }
        }
    }

    fn cancel(&mut self) {
        if self.pending.take().is_some() {
            debug!("Dropping outstanding read");
        }
    }
}

/// Map a device exception to its protocol code.
fn exception_error(exception: tokio_modbus::ExceptionCode) -> ProtocolError {
    use tokio_modbus::ExceptionCode;

    match exception {
        ExceptionCode::IllegalFunction => ProtocolError::ILLEGAL_FUNCTION,
        ExceptionCode::IllegalDataAddress => ProtocolError::ILLEGAL_DATA_ADDRESS,
        ExceptionCode::IllegalDataValue => ProtocolError::ILLEGAL_DATA_VALUE,
        other => {
            debug!(exception = ?other, "Device exception");
            ProtocolError::DEVICE_FAILURE
        }
    }
}

/// Map a master-side failure to its protocol code.
fn transport_error(error: &tokio_modbus::Error) -> ProtocolError {
    match error {
        tokio_modbus::Error::Transport(io) if io.kind() == std::io::ErrorKind::InvalidData => {
            ProtocolError::INVALID_FRAME
        }
        tokio_modbus::Error::Transport(_) => ProtocolError::RESPONSE_TIMED_OUT,
        _ => ProtocolError::INVALID_FRAME,
    }
}

/// Direction hook for transceivers that switch DE/RE in hardware.
///
/// Most USB and TCP RS-485 adapters turn the driver around on their own, so
/// the transitions are only traced.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdapterDirection;

impl DirectionControl for AdapterDirection {
    fn set_transmit(&mut self, enabled: bool) {
        trace!(transmit = enabled, "Bus direction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_codes() {
        use tokio_modbus::ExceptionCode;

        assert_eq!(
            exception_error(ExceptionCode::IllegalDataAddress),
            ProtocolError::ILLEGAL_DATA_ADDRESS
        );
        assert_eq!(
            exception_error(ExceptionCode::IllegalFunction).tag(),
            "0x01"
        );
        assert_eq!(
            exception_error(ExceptionCode::ServerDeviceFailure),
            ProtocolError::DEVICE_FAILURE
        );
    }

    #[test]
    fn test_transport_errors() {
        let timed_out = tokio_modbus::Error::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "no answer",
        ));
        assert_eq!(transport_error(&timed_out), ProtocolError::RESPONSE_TIMED_OUT);

        let corrupt = tokio_modbus::Error::Transport(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad crc",
        ));
        assert_eq!(transport_error(&corrupt), ProtocolError::INVALID_FRAME);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let connection = ConnectionConfig::Tcp {
            host: "127.0.0.1".to_string(),
            port: 1,
        };
        let result = connect(&connection, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(BridgeError::Connection(_))));
    }

    fn silent_link(response_timeout_ms: u64) -> (ModbusLink, tokio::io::DuplexStream) {
        let (client, device) = tokio::io::duplex(1024);
        let ctx = tcp::attach_slave(client, Slave(1));
        let bus = BusConfig {
            connection: ConnectionConfig::Tcp {
                host: "127.0.0.1".to_string(),
                port: 502,
            },
            response_timeout_ms,
            settle_delay_ms: 0,
        };
        (ModbusLink::new(ctx, &bus), device)
    }

    async fn wait_outcome(link: &mut ModbusLink) -> Outcome {
        loop {
            if let Some(outcome) = link.poll_response() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let (mut link, _device) = silent_link(100);
        let request = ReadRequest::new(1, 0, 2).unwrap();

        link.select(1);
        link.send_read(&request).unwrap();
        assert!(link.poll_response().is_none());

        let outcome = tokio::time::timeout(Duration::from_secs(2), wait_outcome(&mut link))
            .await
            .unwrap();
        assert_eq!(outcome, Err(ProtocolError::RESPONSE_TIMED_OUT));
    }

    #[tokio::test]
    async fn test_lock_wait_counts_against_budget() {
        let (mut link, _device) = silent_link(300);
        let request = ReadRequest::new(1, 0, 2).unwrap();

        link.select(1);
        link.send_read(&request).unwrap();
        link.cancel();

        // The abandoned read holds the context for its whole budget.
        let started = std::time::Instant::now();
        link.send_read(&request).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), wait_outcome(&mut link))
            .await
            .unwrap();

        assert_eq!(outcome, Err(ProtocolError::RESPONSE_TIMED_OUT));
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "second read took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_adapter_direction_is_noop() {
        let mut direction = AdapterDirection;
        direction.set_transmit(true);
        direction.set_transmit(false);
    }
}
