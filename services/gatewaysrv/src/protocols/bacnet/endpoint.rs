//! BACnet/IP endpoint: one UDP socket per local interface

use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::apdu::{self, BacnetValue, ObjectId, ResponseBody, ServiceError};
use crate::error::{GatewaySrvError, Result};
use crate::model::device::BACNET_PORT;

const RECV_BUFFER_SIZE: usize = 1500;

/// Outcome of a confirmed service that reached the device
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// BACnet/IP client endpoint bound to one local interface
#[derive(Debug)]
pub struct BacnetEndpoint {
    interface: std::net::Ipv4Addr,
    socket: Option<UdpSocket>,
    invoke_id: u8,
}

impl BacnetEndpoint {
    pub fn new(interface: std::net::Ipv4Addr) -> Self {
        Self {
            interface,
            socket: None,
            invoke_id: 0,
        }
    }

    pub fn interface(&self) -> std::net::Ipv4Addr {
        self.interface
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the socket; port 47808 when free, an ephemeral port otherwise
    pub async fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = match UdpSocket::bind(SocketAddrV4::new(self.interface, BACNET_PORT)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    "BACnet port {} busy on {} ({}), using an ephemeral port",
                    BACNET_PORT, self.interface, e
                );
                UdpSocket::bind(SocketAddrV4::new(self.interface, 0))
                    .await
                    .map_err(|e| {
                        GatewaySrvError::connection(format!(
                            "BACnet bind on {} failed: {}",
                            self.interface, e
                        ))
                    })?
            },
        };

        info!("BACnet endpoint open on {:?}", socket.local_addr().ok());
        self.socket = Some(socket);
        Ok(())
    }

    pub async fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("BACnet endpoint closed on {}", self.interface);
        }
    }

    fn next_invoke_id(&mut self) -> u8 {
        self.invoke_id = self.invoke_id.wrapping_add(1);
        self.invoke_id
    }

    /// ReadProperty
    pub async fn read_property(
        &mut self,
        peer: SocketAddrV4,
        object: ObjectId,
        property: u32,
        request_timeout: Duration,
        retries: u32,
    ) -> Result<ServiceResult<Vec<BacnetValue>>> {
        let body = self
            .request(peer, request_timeout, retries, |invoke_id| {
                apdu::encode_read_property(invoke_id, object, property)
            })
            .await?;

        match body {
            ResponseBody::ReadAck { values, .. } => Ok(Ok(values)),
            ResponseBody::Failed(err) => Ok(Err(err)),
            ResponseBody::SimpleAck { .. } => Err(GatewaySrvError::protocol(
                "SimpleACK received for ReadProperty",
            )),
        }
    }

    /// WriteProperty with optional priority
    #[allow(clippy::too_many_arguments)]
    pub async fn write_property(
        &mut self,
        peer: SocketAddrV4,
        object: ObjectId,
        property: u32,
        value: &BacnetValue,
        priority: Option<u8>,
        request_timeout: Duration,
        retries: u32,
    ) -> Result<ServiceResult<()>> {
        let body = self
            .request(peer, request_timeout, retries, |invoke_id| {
                apdu::encode_write_property(invoke_id, object, property, value, priority)
            })
            .await?;

        match body {
            ResponseBody::SimpleAck { .. } => Ok(Ok(())),
            ResponseBody::Failed(err) => Ok(Err(err)),
            ResponseBody::ReadAck { .. } => Err(GatewaySrvError::protocol(
                "ComplexACK received for WriteProperty",
            )),
        }
    }

    /// Send a confirmed request, retrying on timeout
    async fn request(
        &mut self,
        peer: SocketAddrV4,
        request_timeout: Duration,
        retries: u32,
        build: impl Fn(u8) -> Vec<u8>,
    ) -> Result<ResponseBody> {
        self.open().await?;
        let attempts = retries.saturating_add(1);

        for attempt in 1..=attempts {
            let invoke_id = self.next_invoke_id();
            let packet = build(invoke_id);
            let socket = self
                .socket
                .as_ref()
                .ok_or_else(GatewaySrvError::not_connected)?;

            trace!("BACnet TX to {}: {:02X?}", peer, packet);
            socket.send_to(&packet, peer).await?;

            match timeout(request_timeout, await_response(socket, peer, invoke_id)).await {
                Ok(result) => return result,
                Err(_) => debug!(
                    "BACnet request {} to {} timed out (attempt {}/{})",
                    invoke_id, peer, attempt, attempts
                ),
            }
        }

        Err(GatewaySrvError::timeout(format!(
            "No BACnet response from {} after {} attempts",
            peer, attempts
        )))
    }
}

/// Wait for the answer with `invoke_id` from `peer`, dropping anything else
async fn await_response(
    socket: &UdpSocket,
    peer: SocketAddrV4,
    invoke_id: u8,
) -> Result<ResponseBody> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        if from.ip() != IpAddr::V4(*peer.ip()) {
            trace!("Ignoring datagram from {}", from);
            continue;
        }
        match apdu::decode_response(&buf[..n]) {
            Ok(response) if response.invoke_id == invoke_id => return Ok(response.body),
            Ok(response) => debug!(
                "Ignoring stale BACnet response {} (expected {})",
                response.invoke_id, invoke_id
            ),
            Err(e) => debug!("Ignoring undecodable datagram from {}: {}", from, e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocols::bacnet::apdu::{confirmed_service, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT};
    use std::net::Ipv4Addr;

    /// Fake device answering present-value reads with 21.5 and
    /// unknown-object for instance 99
    async fn fake_device() -> SocketAddrV4 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            loop {
                let (n, from) = socket.recv_from(&mut buf).await.unwrap();
                let req = apdu::decode_request(&buf[..n]).unwrap();
                let reply = if req.object.instance == 99 {
                    apdu::encode_error(
                        req.invoke_id,
                        req.service,
                        ERROR_CLASS_OBJECT,
                        ERROR_CODE_UNKNOWN_OBJECT,
                    )
                } else if req.service == confirmed_service::WRITE_PROPERTY {
                    apdu::encode_simple_ack(req.invoke_id, req.service)
                } else {
                    apdu::encode_read_ack(
                        req.invoke_id,
                        req.object,
                        req.property,
                        &[BacnetValue::Real(21.5)],
                    )
                };
                socket.send_to(&reply, from).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_read_and_write_property() {
        let peer = fake_device().await;
        let mut endpoint = BacnetEndpoint::new(Ipv4Addr::LOCALHOST);

        let values = endpoint
            .read_property(peer, ObjectId::new(0, 1), 85, Duration::from_secs(1), 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(values, vec![BacnetValue::Real(21.5)]);

        let written = endpoint
            .write_property(
                peer,
                ObjectId::new(2, 1),
                85,
                &BacnetValue::Real(7.0),
                Some(11),
                Duration::from_secs(1),
                0,
            )
            .await
            .unwrap();
        assert!(written.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_object_is_service_error() {
        let peer = fake_device().await;
        let mut endpoint = BacnetEndpoint::new(Ipv4Addr::LOCALHOST);
        let err = endpoint
            .read_property(peer, ObjectId::new(0, 99), 85, Duration::from_secs(1), 0)
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_unknown_object());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_after_retries() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = match silent.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        let mut endpoint = BacnetEndpoint::new(Ipv4Addr::LOCALHOST);
        let err = endpoint
            .read_property(peer, ObjectId::new(0, 1), 85, Duration::from_millis(50), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewaySrvError::TimeoutError(_)));
        assert!(err.to_string().contains("3 attempts"));
    }
}
