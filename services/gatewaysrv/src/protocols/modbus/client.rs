//! Modbus master over TCP or a serial line
//!
//! Framing and PDU handling come from `tokio-modbus`. This wrapper owns the
//! connection lifecycle: lazy connect, per-request unit selection, request
//! timeout and dropping the context after a transport failure.
//!
//! One request is in flight at a time: the client is always used behind a
//! mutex owned by the resource registry, and every method takes `&mut self`.

use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{error::Elapsed, timeout};
use tokio_modbus::client::{rtu, tcp, Client as _, Context, Reader as _, Writer as _};
use tokio_modbus::slave::{Slave, SlaveContext as _};
use tracing::{debug, info, warn};

use super::serial;
use crate::error::{GatewaySrvError, Result};
use crate::model::{FunctionCode, SerialSettings};

/// FC01/FC02
pub const MAX_READ_COILS: u16 = 2000;
/// FC03/FC04
pub const MAX_READ_REGISTERS: u16 = 125;
/// FC15
pub const MAX_WRITE_COILS: usize = 1968;
/// FC16
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Byte stream a Modbus client can run over
pub trait ByteStream: AsyncRead + AsyncWrite + std::fmt::Debug + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + std::fmt::Debug + Unpin + Send + 'static> ByteStream for T {}

/// Transmission mode of a Modbus client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// MBAP header over TCP
    Tcp,
    /// Address + PDU + CRC, over a serial line or a raw TCP socket
    Rtu,
}

/// Where the client connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusEndpoint {
    Tcp(SocketAddrV4),
    Serial(SerialSettings),
}

impl std::fmt::Display for ModbusEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Serial(settings) => write!(f, "serial://{}", settings.port),
        }
    }
}

/// Decoded payload of a read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    /// FC01 / FC02
    Bits(Vec<bool>),
    /// FC03 / FC04
    Registers(Vec<u16>),
}

/// Payload of a write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePayload {
    Coil(bool),
    Register(u16),
    Coils(Vec<bool>),
    Registers(Vec<u16>),
}

impl WritePayload {
    /// Reject payloads that do not fit the function code or a single PDU
    fn check(&self, fc: FunctionCode) -> Result<()> {
        let fits = match (fc, self) {
            (FunctionCode::WriteCoil, Self::Coil(_))
            | (FunctionCode::WriteRegister, Self::Register(_)) => true,
            (FunctionCode::WriteCoils, Self::Coils(bits)) => {
                !bits.is_empty() && bits.len() <= MAX_WRITE_COILS
            },
            (FunctionCode::WriteRegisters, Self::Registers(regs)) => {
                !regs.is_empty() && regs.len() <= MAX_WRITE_REGISTERS
            },
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(GatewaySrvError::validation(format!(
                "Payload {:?} does not fit {}",
                self, fc
            )))
        }
    }
}

fn check_read(fc: FunctionCode, quantity: u16) -> Result<()> {
    let limit = match fc {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => MAX_READ_COILS,
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            MAX_READ_REGISTERS
        },
        other => {
            return Err(GatewaySrvError::validation(format!(
                "{} is not a read function",
                other
            )))
        },
    };
    if quantity == 0 || quantity > limit {
        return Err(GatewaySrvError::validation(format!(
            "{} quantity {} outside 1..={}",
            fc, quantity, limit
        )));
    }
    Ok(())
}

/// Modbus master
pub struct ModbusClient {
    endpoint: ModbusEndpoint,
    framing: Framing,
    connect_timeout: Duration,
    context: Option<Context>,
}

impl std::fmt::Debug for ModbusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusClient")
            .field("endpoint", &self.endpoint)
            .field("framing", &self.framing)
            .field("connected", &self.context.is_some())
            .finish()
    }
}

/// Unit address used until the first request selects one
const DEFAULT_UNIT: Slave = Slave(1);

fn attach<T: ByteStream>(framing: Framing, stream: T) -> Context {
    match framing {
        Framing::Tcp => tcp::attach_slave(stream, DEFAULT_UNIT),
        Framing::Rtu => rtu::attach_slave(stream, DEFAULT_UNIT),
    }
}

impl ModbusClient {
    pub fn new(endpoint: ModbusEndpoint, framing: Framing, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            framing,
            connect_timeout,
            context: None,
        }
    }

    /// Client running over an already-open stream
    ///
    /// After a transport failure the next request reconnects to `endpoint`.
    pub fn with_stream<T: ByteStream>(endpoint: ModbusEndpoint, framing: Framing, stream: T) -> Self {
        Self {
            context: Some(attach(framing, stream)),
            ..Self::new(endpoint, framing, Duration::from_secs(1))
        }
    }

    pub fn endpoint(&self) -> &ModbusEndpoint {
        &self.endpoint
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    /// Open the connection if it is not open yet
    pub async fn connect(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }

        let context = match &self.endpoint {
            ModbusEndpoint::Tcp(addr) => {
                let stream = timeout(self.connect_timeout, TcpStream::connect(*addr))
                    .await
                    .map_err(|_| {
                        GatewaySrvError::timeout(format!("Connect to {} timed out", addr))
                    })?
                    .map_err(|e| {
                        GatewaySrvError::connection(format!("Connect to {} failed: {}", addr, e))
                    })?;
                stream.set_nodelay(true)?;
                attach(self.framing, stream)
            },
            ModbusEndpoint::Serial(settings) => attach(self.framing, serial::open(settings)?),
        };

        info!("Modbus connected: {} ({:?})", self.endpoint, self.framing);
        self.context = Some(context);
        Ok(())
    }

    /// Drop the connection; the next request reconnects
    pub async fn close(&mut self) {
        if let Some(mut context) = self.context.take() {
            if let Err(e) = context.disconnect().await {
                debug!("Modbus close {}: {}", self.endpoint, e);
            }
            info!("Modbus disconnected: {}", self.endpoint);
        }
    }

    /// Connected context addressed to `unit`
    async fn context_for(&mut self, unit: u8) -> Result<&mut Context> {
        self.connect().await?;
        let context = self
            .context
            .as_mut()
            .ok_or_else(GatewaySrvError::not_connected)?;
        context.set_slave(Slave(unit));
        Ok(context)
    }

    /// FC01-FC04
    pub async fn read(
        &mut self,
        unit: u8,
        fc: FunctionCode,
        address: u16,
        quantity: u16,
        request_timeout: Duration,
    ) -> Result<ModbusResponse> {
        check_read(fc, quantity)?;
        let context = self.context_for(unit).await?;
        let request = async {
            match fc {
                FunctionCode::ReadCoils => context
                    .read_coils(address, quantity)
                    .await
                    .map(|r| r.map(ModbusResponse::Bits)),
                FunctionCode::ReadDiscreteInputs => context
                    .read_discrete_inputs(address, quantity)
                    .await
                    .map(|r| r.map(ModbusResponse::Bits)),
                FunctionCode::ReadInputRegisters => context
                    .read_input_registers(address, quantity)
                    .await
                    .map(|r| r.map(ModbusResponse::Registers)),
                _ => context
                    .read_holding_registers(address, quantity)
                    .await
                    .map(|r| r.map(ModbusResponse::Registers)),
            }
        };
        let outcome = timeout(request_timeout, request).await;
        self.settle(unit, fc, request_timeout, outcome)
    }

    /// FC05/FC06/FC15/FC16
    pub async fn write(
        &mut self,
        unit: u8,
        fc: FunctionCode,
        address: u16,
        payload: &WritePayload,
        request_timeout: Duration,
    ) -> Result<()> {
        payload.check(fc)?;
        let context = self.context_for(unit).await?;
        let request = async {
            match payload {
                WritePayload::Coil(on) => context.write_single_coil(address, *on).await,
                WritePayload::Register(value) => {
                    context.write_single_register(address, *value).await
                },
                WritePayload::Coils(bits) => context.write_multiple_coils(address, bits).await,
                WritePayload::Registers(regs) => {
                    context.write_multiple_registers(address, regs).await
                },
            }
        };
        let outcome = timeout(request_timeout, request).await;
        self.settle(unit, fc, request_timeout, outcome)
    }

    /// Map a finished request to the crate's error model
    ///
    /// Transport failures and timeouts drop the context so the next request
    /// starts on a clean connection instead of reading a stale reply. A
    /// Modbus exception is a complete exchange and keeps the link.
    fn settle<T>(
        &mut self,
        unit: u8,
        fc: FunctionCode,
        request_timeout: Duration,
        outcome: std::result::Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T> {
        let err = match outcome {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(code))) => {
                debug!("Unit {} answered {} with {}", unit, fc, code);
                return Err(GatewaySrvError::from(code));
            },
            Ok(Err(e)) => GatewaySrvError::from(e),
            Err(_) => GatewaySrvError::timeout(format!(
                "No response from unit {} on {} within {:?}",
                unit, self.endpoint, request_timeout
            )),
        };
        warn!("Modbus request failed on {}: {}", self.endpoint, err);
        self.context = None;
        Err(err)
    }
}
