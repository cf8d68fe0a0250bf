//! Gateway service (`gatewaysrv`)

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use errors::{GatewayErrorTrait, GatewayResult};
use gatewaysrv::api::{self, RpcDispatcher};
use gatewaysrv::bootstrap::{self, Args};
use gatewaysrv::transport::TransportFactory;
use gatewaysrv::upstream::{HttpUpstream, MqttBridge, ObjectPublisher};
use gatewaysrv::{Gateway, GatewaySettings};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let args = Args::parse();
    let config = bootstrap::load_config(&args)?;

    // Validation mode: validate and exit
    if args.validate {
        println!(
            "Configuration valid: {} devices",
            config.poll_device_ids.len()
        );
        return Ok(());
    }

    bootstrap::initialize_logging(&config)?;
    info!("Starting {} {}", bootstrap::SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    let http = HttpUpstream::new(config.http.clone())?;

    let mqtt = if config.mqtt.is_enabled() && !args.no_mqtt {
        Some(MqttBridge::new(config.mqtt.clone())?)
    } else {
        None
    };
    let publisher = mqtt
        .as_ref()
        .map(|(bridge, _)| Arc::new(bridge.clone()) as Arc<dyn ObjectPublisher>);

    let gateway = Gateway::new(
        GatewaySettings::from(&config),
        Arc::new(http.clone()),
        Arc::new(TransportFactory::default()),
        Arc::new(http.clone()),
        publisher,
    );
    let cancel = gateway.cancel_token();
    let dispatcher = Arc::new(RpcDispatcher::new(gateway.clone(), config.api.priority));

    let mut services = Vec::new();
    services.push(tokio::spawn(common::cancel_on_shutdown(cancel.clone())));

    if let Some((bridge, eventloop)) = mqtt {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        services.push(tokio::spawn(async move {
            bridge.run(eventloop, dispatcher, cancel).await;
        }));
    }

    if !args.no_api {
        let url = config.api.url.clone();
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        services.push(tokio::spawn(async move {
            if let Err(e) = api::serve(&url, dispatcher, cancel.clone()).await {
                error!("API server stopped: {}", e);
                cancel.cancel();
            }
        }));
    }

    let result = gateway.run().await;
    cancel.cancel();
    for service in services {
        let _ = service.await;
    }

    if !http.drain(config.shutdown_timeout).await {
        error!("Pending uploads dropped at shutdown");
    }
    match &result {
        Ok(()) => info!("Gateway stopped"),
        Err(e) => error!(
            "Gateway stopped [{}/{:?}]: {}",
            e.error_code(),
            e.category(),
            e
        ),
    }
    result.map_err(Into::into)
}
