//! End-to-end polling and writes against the Modbus TCP simulator
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, RecordingUploader, StaticUpstream};
use gatewaysrv::model::{
    DataType, DeviceDescriptor, DeviceTransport, Endian, ModbusPoint, ObjectKey, ObjectSpec,
    ObjectType, PresentValue, Protocol,
};
use gatewaysrv::poller::PollerSettings;
use gatewaysrv::protocols::modbus::ModbusSimulator;
use gatewaysrv::transport::{ResourceRegistry, TransportFactory};
use gatewaysrv::{Gateway, GatewaySettings};

const DEVICE: u32 = 21;

async fn start_simulator() -> (ModbusSimulator, SocketAddr) {
    let sim = ModbusSimulator::new();
    let addr = sim.start("127.0.0.1:0").await.unwrap();
    (sim, addr)
}

fn tcp_descriptor(device_id: u32, addr: SocketAddr) -> DeviceDescriptor {
    let address = match addr {
        SocketAddr::V4(v4) => *v4.ip(),
        SocketAddr::V6(_) => unreachable!(),
    };
    let mut desc = DeviceDescriptor::new(
        device_id,
        Protocol::ModbusTcp,
        DeviceTransport::Tcp {
            address,
            port: addr.port(),
        },
    );
    desc.poll_period = Duration::from_millis(200);
    desc.apdu_timeout = Duration::from_millis(500);
    desc.object_types = vec![ObjectType::AnalogInput, ObjectType::AnalogOutput];
    desc
}

/// FLOAT32 at 100..=101, little byte order, big word order, scale 10
fn float_input() -> ObjectSpec {
    let mut point = ModbusPoint::holding(100, 2, DataType::Float, 32);
    point.byte_order = Endian::Little;
    point.word_order = Endian::Big;
    point.scale = 10.0;
    ObjectSpec::modbus(
        ObjectKey::new(DEVICE, ObjectType::AnalogInput, 1),
        "supply-temp",
        point,
    )
}

fn setpoint() -> ObjectSpec {
    ObjectSpec::modbus(
        ObjectKey::new(DEVICE, ObjectType::AnalogOutput, 2),
        "setpoint",
        ModbusPoint::holding(10, 1, DataType::Uint, 16),
    )
}

fn gateway(
    upstream: Arc<StaticUpstream>,
    registry: Arc<ResourceRegistry>,
    uploader: Arc<RecordingUploader>,
) -> Arc<Gateway> {
    Gateway::new(
        GatewaySettings {
            device_ids: vec![DEVICE],
            update_period: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(5),
            override_threshold: 8,
            poller: PollerSettings::default(),
        },
        upstream,
        Arc::new(TransportFactory::new(registry)),
        uploader,
        None,
    )
}

#[tokio::test]
async fn polls_decodes_and_uploads_float_register() {
    let (sim, addr) = start_simulator().await;
    sim.set_holding_registers(100, &[0x0000, 0x4120]).await;

    let upstream = Arc::new(
        StaticUpstream::default().with_device(tcp_descriptor(DEVICE, addr), vec![float_input()]),
    );
    let uploader = Arc::new(RecordingUploader::default());
    let gw = gateway(upstream, Arc::new(ResourceRegistry::new()), uploader.clone());
    gw.build().await.unwrap();

    let uploaded = eventually(Duration::from_secs(5), || {
        !uploader.batches_for(DEVICE).is_empty()
    })
    .await;
    assert!(uploaded);
    assert_eq!(uploader.batches_for(DEVICE)[0], "1 0 100.0 0;");

    let snapshot = gw
        .snapshot(&ObjectKey::new(DEVICE, ObjectType::AnalogInput, 1))
        .unwrap();
    assert_eq!(snapshot.present_value, PresentValue::Real(100.0));
    assert_eq!(snapshot.status_flags, 0);
    assert_eq!(snapshot.reliability, None);
    gw.shutdown().await;
}

#[tokio::test]
async fn write_with_check_confirms_readback() {
    let (sim, addr) = start_simulator().await;
    let upstream = Arc::new(
        StaticUpstream::default().with_device(tcp_descriptor(DEVICE, addr), vec![setpoint()]),
    );
    let gw = gateway(
        upstream,
        Arc::new(ResourceRegistry::new()),
        Arc::new(RecordingUploader::default()),
    );
    gw.build().await.unwrap();

    let key = ObjectKey::new(DEVICE, ObjectType::AnalogOutput, 2);
    assert!(gw
        .write_with_check(&key, &PresentValue::Int(7), 11)
        .await
        .unwrap());
    assert_eq!(sim.holding_register(10).await, 7);
    assert_eq!(gw.snapshot(&key).unwrap().present_value, PresentValue::Real(7.0));

    let fresh = gw.read(&key).await.unwrap();
    assert_eq!(fresh.present_value, PresentValue::Real(7.0));
    gw.shutdown().await;
}

#[tokio::test]
async fn silent_device_reports_timeout_fault() {
    let (sim, addr) = start_simulator().await;
    sim.set_silent(true);
    let upstream = Arc::new(
        StaticUpstream::default().with_device(tcp_descriptor(DEVICE, addr), vec![float_input()]),
    );
    let uploader = Arc::new(RecordingUploader::default());
    let gw = gateway(upstream, Arc::new(ResourceRegistry::new()), uploader.clone());
    gw.build().await.unwrap();

    let uploaded = eventually(Duration::from_secs(5), || {
        !uploader.batches_for(DEVICE).is_empty()
    })
    .await;
    assert!(uploaded);
    assert_eq!(uploader.batches_for(DEVICE)[0], "1 0 null 2 timeout;");
    gw.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_shared_resources_once() {
    let (_sim_a, addr_a) = start_simulator().await;
    let (_sim_b, addr_b) = start_simulator().await;
    let mut second = tcp_descriptor(DEVICE + 1, addr_b);
    second.object_types = vec![ObjectType::AnalogOutput];
    let second_spec = ObjectSpec::modbus(
        ObjectKey::new(DEVICE + 1, ObjectType::AnalogOutput, 2),
        "setpoint",
        ModbusPoint::holding(10, 1, DataType::Uint, 16),
    );

    let upstream = Arc::new(
        StaticUpstream::default()
            .with_device(tcp_descriptor(DEVICE, addr_a), vec![setpoint()])
            .with_device(second, vec![second_spec]),
    );
    let registry = Arc::new(ResourceRegistry::new());
    let gw = Gateway::new(
        GatewaySettings {
            device_ids: vec![DEVICE, DEVICE + 1],
            update_period: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(5),
            override_threshold: 8,
            poller: PollerSettings::default(),
        },
        upstream,
        Arc::new(TransportFactory::new(registry.clone())),
        Arc::new(RecordingUploader::default()),
        None,
    );
    gw.build().await.unwrap();

    let connected = eventually(Duration::from_secs(5), || registry.len() == 2).await;
    assert!(connected);

    gw.shutdown().await;
    assert!(registry.is_empty());
    assert_eq!(registry.close_all().await, 0);
}
