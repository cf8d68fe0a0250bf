//! Poller life-cycle scenarios against an in-memory device
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{MemoryFactory, Op, RecordingUploader, StaticUpstream};
use gatewaysrv::model::{
    DeviceDescriptor, DeviceTransport, ObjectKey, ObjectSpec, ObjectType, PolledObject,
    PresentValue, Protocol, StatusFlag,
};
use gatewaysrv::poller::{DevicePoller, PollerSettings};
use gatewaysrv::serialiser::Serialiser;
use gatewaysrv::verifier::Verifier;
use gatewaysrv::write_check::write_with_check;
use gatewaysrv::{Gateway, GatewaySettings};

fn descriptor(device_id: u32, poll_period: Duration) -> DeviceDescriptor {
    let mut desc = DeviceDescriptor::new(
        device_id,
        Protocol::ModbusTcp,
        DeviceTransport::Tcp {
            address: Ipv4Addr::LOCALHOST,
            port: 502,
        },
    );
    desc.poll_period = poll_period;
    desc.object_types = vec![ObjectType::MultiStateValue];
    desc
}

fn objects(device_id: u32, ids: &[u32]) -> Vec<Arc<PolledObject>> {
    ids.iter()
        .map(|&id| {
            Arc::new(PolledObject::new(ObjectSpec::bacnet(
                ObjectKey::new(device_id, ObjectType::MultiStateValue, id),
                format!("msv-{}", id),
            )))
        })
        .collect()
}

fn poller(
    factory: Arc<MemoryFactory>,
    desc: DeviceDescriptor,
    settings: PollerSettings,
) -> (Arc<DevicePoller>, Arc<RecordingUploader>) {
    let uploader = Arc::new(RecordingUploader::default());
    let poller = DevicePoller::new(
        desc,
        factory,
        Verifier::new(8),
        Serialiser::new(uploader.clone(), None, 8),
        settings,
    );
    (poller, uploader)
}

#[tokio::test(start_paused = true)]
async fn unreachable_object_is_parked_then_readmitted() {
    let factory = Arc::new(MemoryFactory::default());
    factory.client(1).failing.lock().insert(2);

    let settings = PollerSettings {
        unreachable_threshold: 3,
        unreachable_reset_period: Duration::from_secs(605),
    };
    let (poller, uploader) = poller(factory.clone(), descriptor(1, Duration::from_secs(10)), settings);
    let objs = objects(1, &[1, 2]);
    let failing = objs[1].clone();
    poller.load_objects(objs);
    poller.start();

    // Polls at t=0, 10, 20: the third timeout parks the object
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(poller.unreachable_objects(), vec![failing.key()]);
    assert_eq!(poller.live_objects().len(), 1);
    assert!(failing.state().present_value.is_null());
    assert!(failing.state().status_flags.check(StatusFlag::Fault));
    assert_eq!(failing.state().reliability.as_deref(), Some("timeout"));

    // Parked objects are not read
    let reads_before = factory.client(1).log.lock().len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    let reads_of_failing = factory.client(1).log.lock()[reads_before..]
        .iter()
        .filter(|op| **op == Op::Read(2))
        .count();
    assert_eq!(reads_of_failing, 0);

    // Re-admitted by the reset task at t=605
    tokio::time::sleep_until(tokio::time::Instant::now() + Duration::from_secs(552)).await;
    assert!(poller.live_objects().contains(&failing.key()));
    assert!(poller.unreachable_objects().is_empty());

    // Healthy object keeps reporting
    assert!(uploader.batches_for(1).iter().any(|b| b.starts_with("1 19 0 ")));
    assert!(poller.stop(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn write_completes_before_next_poll_read() {
    let factory = Arc::new(MemoryFactory {
        read_delay: Duration::from_secs(1),
        ..Default::default()
    });
    let (poller, _uploader) = poller(
        factory.clone(),
        descriptor(1, Duration::from_secs(60)),
        PollerSettings::default(),
    );
    let objs = objects(1, &[1, 2, 3, 4]);
    let target = objs[2].clone();
    poller.load_objects(objs);
    poller.start();

    // The first iteration is reading object 1
    tokio::time::sleep(Duration::from_millis(500)).await;
    let confirmed = write_with_check(&poller, &target, &PresentValue::Int(7), 11)
        .await
        .unwrap();
    assert!(confirmed);

    // Let the iteration finish
    tokio::time::sleep(Duration::from_secs(10)).await;
    let log = factory.client(1).log.lock().clone();
    let write_at = log.iter().position(|op| *op == Op::Write(3)).unwrap();
    let poll_read_at = log.iter().position(|op| *op == Op::Read(3)).unwrap();
    assert!(write_at < poll_read_at, "log: {:?}", log);
    assert_eq!(target.state().present_value, PresentValue::Int(7));
    assert!(poller.stop(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn relinquish_with_failed_readback_is_not_confirmed() {
    let factory = Arc::new(MemoryFactory::default());
    factory.client(1).failing.lock().insert(5);
    let (poller, _uploader) = poller(
        factory.clone(),
        descriptor(1, Duration::from_secs(60)),
        PollerSettings::default(),
    );
    let objs = objects(1, &[5]);
    let target = objs[0].clone();
    poller.load_objects(objs);

    let confirmed = write_with_check(&poller, &target, &PresentValue::Null, 8)
        .await
        .unwrap();
    assert!(!confirmed);
    assert!(target.state().present_value.is_null());
    assert_eq!(target.state().reliability.as_deref(), Some("timeout"));
    assert_eq!(factory.client(1).log.lock().as_slice(), &[Op::Write(5)]);

    // Once the device answers again a write is confirmed by its readback
    factory.client(1).failing.lock().clear();
    let confirmed = write_with_check(&poller, &target, &PresentValue::Int(3), 8)
        .await
        .unwrap();
    assert!(confirmed);
    assert_eq!(target.state().present_value, PresentValue::Int(3));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_client_once() {
    let upstream = StaticUpstream::default();
    let upstream = [1u32, 2]
        .iter()
        .fold(upstream, |up, &id| {
            let specs = (1..=3)
                .map(|n| {
                    ObjectSpec::bacnet(ObjectKey::new(id, ObjectType::MultiStateValue, n), "o")
                })
                .collect();
            up.with_device(descriptor(id, Duration::from_secs(5)), specs)
        });
    let upstream = Arc::new(upstream);
    let factory = Arc::new(MemoryFactory {
        read_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let uploader = Arc::new(RecordingUploader::default());

    let gateway = Gateway::new(
        GatewaySettings {
            device_ids: vec![1, 2],
            update_period: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(60),
            override_threshold: 8,
            poller: PollerSettings::default(),
        },
        upstream.clone(),
        factory.clone(),
        uploader.clone(),
        None,
    );
    let runner = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.run().await })
    };

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(gateway.device_ids(), vec![1, 2]);
    assert!(!uploader.batches_for(1).is_empty());
    assert!(!uploader.batches_for(2).is_empty());

    gateway.cancel_token().cancel();
    runner.await.unwrap().unwrap();

    for id in [1, 2] {
        assert_eq!(factory.client(id).closes.load(Ordering::SeqCst), 1);
    }
    assert_eq!(factory.close_all_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.logouts.load(Ordering::SeqCst), 1);
    assert!(gateway.device_ids().is_empty());
}
