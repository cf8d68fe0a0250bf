//! Modbus TCP simulator for testing
//!
//! A small in-memory Modbus TCP server on top of the `tokio-modbus` server.
//! Addresses are zero-based protocol addresses. Supports FC01-FC06, FC15
//! and FC16; every unit id shares the same memory.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_modbus::prelude::{ExceptionCode, Request, Response};
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::{debug, error, info};

use super::client::{MAX_READ_COILS, MAX_READ_REGISTERS};
use crate::error::Result;

type Reply = Pin<Box<dyn Future<Output = std::result::Result<Response, ExceptionCode>> + Send>>;

#[derive(Debug, Default)]
struct Memory {
    coils: HashMap<u16, bool>,
    discrete_inputs: HashMap<u16, bool>,
    holding_registers: HashMap<u16, u16>,
    input_registers: HashMap<u16, u16>,
}

/// `quantity` consecutive addresses starting at `address`
fn span(address: u16, quantity: u16, limit: u16) -> std::result::Result<(), ExceptionCode> {
    if quantity == 0 || quantity > limit {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if address.checked_add(quantity - 1).is_none() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

fn read_table<T: Copy + Default>(
    table: &HashMap<u16, T>,
    address: u16,
    quantity: u16,
    limit: u16,
) -> std::result::Result<Vec<T>, ExceptionCode> {
    span(address, quantity, limit)?;
    Ok((0..quantity)
        .map(|i| table.get(&(address + i)).copied().unwrap_or_default())
        .collect())
}

fn write_table<T: Copy>(
    table: &mut HashMap<u16, T>,
    address: u16,
    values: &[T],
) -> std::result::Result<(), ExceptionCode> {
    span(address, values.len() as u16, u16::MAX)?;
    for (i, value) in values.iter().enumerate() {
        table.insert(address + i as u16, *value);
    }
    Ok(())
}

/// In-memory Modbus TCP server
#[derive(Debug, Clone, Default)]
pub struct ModbusSimulator {
    memory: Arc<RwLock<Memory>>,
    /// While set, requests are read but never answered
    silent: Arc<AtomicBool>,
    requests: Arc<AtomicU64>,
}

impl ModbusSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_holding_registers(&self, address: u16, values: &[u16]) {
        let mut memory = self.memory.write().await;
        for (i, value) in values.iter().enumerate() {
            memory
                .holding_registers
                .insert(address.wrapping_add(i as u16), *value);
        }
    }

    pub async fn set_input_registers(&self, address: u16, values: &[u16]) {
        let mut memory = self.memory.write().await;
        for (i, value) in values.iter().enumerate() {
            memory
                .input_registers
                .insert(address.wrapping_add(i as u16), *value);
        }
    }

    pub async fn set_coil(&self, address: u16, on: bool) {
        self.memory.write().await.coils.insert(address, on);
    }

    pub async fn set_discrete_input(&self, address: u16, on: bool) {
        self.memory.write().await.discrete_inputs.insert(address, on);
    }

    pub async fn holding_register(&self, address: u16) -> u16 {
        self.memory
            .read()
            .await
            .holding_registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub async fn coil(&self, address: u16) -> bool {
        self.memory
            .read()
            .await
            .coils
            .get(&address)
            .copied()
            .unwrap_or(false)
    }

    /// Stop (or resume) answering requests
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Bind to `addr` (e.g. `127.0.0.1:0`) and serve in the background
    pub async fn start(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Modbus simulator listening on {}", local_addr);

        let sim = self.clone();
        tokio::spawn(async move {
            let server = Server::new(listener);
            let on_connected = move |stream, peer| {
                let service = sim.clone();
                async move {
                    debug!("New connection from {}", peer);
                    accept_tcp_connection(stream, peer, move |_| Ok(Some(service.clone())))
                }
            };
            let on_process_error = |err| {
                debug!("Connection closed: {}", err);
            };
            if let Err(e) = server.serve(&on_connected, on_process_error).await {
                error!("Modbus simulator stopped: {}", e);
            }
        });

        Ok(local_addr)
    }

    /// Execute one request against the simulated memory
    pub async fn handle_request(
        &self,
        request: Request<'_>,
    ) -> std::result::Result<Response, ExceptionCode> {
        match request {
            Request::ReadCoils(address, quantity) => {
                let memory = self.memory.read().await;
                read_table(&memory.coils, address, quantity, MAX_READ_COILS)
                    .map(Response::ReadCoils)
            },
            Request::ReadDiscreteInputs(address, quantity) => {
                let memory = self.memory.read().await;
                read_table(&memory.discrete_inputs, address, quantity, MAX_READ_COILS)
                    .map(Response::ReadDiscreteInputs)
            },
            Request::ReadHoldingRegisters(address, quantity) => {
                let memory = self.memory.read().await;
                read_table(&memory.holding_registers, address, quantity, MAX_READ_REGISTERS)
                    .map(Response::ReadHoldingRegisters)
            },
            Request::ReadInputRegisters(address, quantity) => {
                let memory = self.memory.read().await;
                read_table(&memory.input_registers, address, quantity, MAX_READ_REGISTERS)
                    .map(Response::ReadInputRegisters)
            },
            Request::WriteSingleCoil(address, on) => {
                self.memory.write().await.coils.insert(address, on);
                Ok(Response::WriteSingleCoil(address, on))
            },
            Request::WriteSingleRegister(address, value) => {
                self.memory
                    .write()
                    .await
                    .holding_registers
                    .insert(address, value);
                Ok(Response::WriteSingleRegister(address, value))
            },
            Request::WriteMultipleCoils(address, bits) => {
                write_table(&mut self.memory.write().await.coils, address, &*bits)?;
                Ok(Response::WriteMultipleCoils(address, bits.len() as u16))
            },
            Request::WriteMultipleRegisters(address, words) => {
                write_table(
                    &mut self.memory.write().await.holding_registers,
                    address,
                    &*words,
                )?;
                Ok(Response::WriteMultipleRegisters(address, words.len() as u16))
            },
            _ => Err(ExceptionCode::IllegalFunction),
        }
    }
}

impl tokio_modbus::server::Service for ModbusSimulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Reply;

    fn call(&self, request: Self::Request) -> Self::Future {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.silent.load(Ordering::SeqCst) {
            debug!("Silent: dropping {:?}", request);
            return Box::pin(std::future::pending());
        }
        let sim = self.clone();
        Box::pin(async move { sim.handle_request(request).await })
    }
}
