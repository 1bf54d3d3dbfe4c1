use clap::{App, Arg};
use fanbus::adapter::{FieldGateway, NodeAdapter, Protocol, RegisterAdapter};
use fanbus::config::{Config, SensorSource};
use fanbus::controller::{HysteresisController, TelemetrySource};
use fanbus::hardware::{LogActuator, SimulatedSensor, ThermalZoneSensor};
use fanbus::{modbus_server, node_server, AccessMediator, ControlState, PolicyPreset, ServiceMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("fanbus-server")
        .version("0.1.0")
        .about("🌀 Fan controller with Modbus/TCP and node protocol front ends")
        .arg(
            Arg::with_name("modbus-addr")
                .long("modbus-addr")
                .value_name("ADDR")
                .help("Modbus/TCP listen address (overrides FANBUS_MODBUS_ADDR)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("node-addr")
                .long("node-addr")
                .value_name("ADDR")
                .help("Node protocol listen address (overrides FANBUS_NODE_ADDR)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("policy")
                .long("policy")
                .value_name("PRESET")
                .help("Anonymous write policy (overrides FANBUS_POLICY)")
                .takes_value(true)
                .possible_values(&["strict", "operator", "open"]),
        )
        .arg(
            Arg::with_name("tick-ms")
                .long("tick-ms")
                .value_name("MS")
                .help("Control loop period in milliseconds (overrides FANBUS_TICK_MS)")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Period must be a positive number of milliseconds".into()),
                }),
        )
        .arg(
            Arg::with_name("sensor")
                .long("sensor")
                .value_name("SOURCE")
                .help("'simulated' or a thermal zone file path (overrides FANBUS_SENSOR)")
                .takes_value(true),
        )
        .get_matches();

    let mut config = Config::from_env()?;
    if let Some(addr) = matches.value_of("modbus-addr") {
        config.modbus_addr = addr.parse()?;
    }
    if let Some(addr) = matches.value_of("node-addr") {
        config.node_addr = addr.parse()?;
    }
    if let Some(policy) = matches.value_of("policy") {
        config.policy = policy.parse::<PolicyPreset>()?;
    }
    if let Some(ms) = matches.value_of("tick-ms") {
        config.tick = Duration::from_millis(ms.parse()?);
    }
    if let Some(sensor) = matches.value_of("sensor") {
        config.sensor = sensor.parse::<SensorSource>()?;
    }
    config.validate()?;

    println!("🌀 fanbus controller");
    println!("====================");

    let state = Arc::new(ControlState::new(config.defaults));
    let metrics = Arc::new(ServiceMetrics::new());
    let authenticator = Arc::new(config.authenticator());

    let register_adapter = Arc::new(RegisterAdapter::new(FieldGateway::new(
        Protocol::Register,
        Arc::clone(&state),
        AccessMediator::new(Arc::clone(&authenticator), config.modbus_limits),
        Arc::clone(&metrics),
    )));
    let node_adapter = Arc::new(NodeAdapter::new(FieldGateway::new(
        Protocol::Node,
        Arc::clone(&state),
        AccessMediator::new(Arc::clone(&authenticator), config.node_limits),
        Arc::clone(&metrics),
    )));

    let sensor: Box<dyn TelemetrySource> = match &config.sensor {
        SensorSource::Simulated => Box::new(SimulatedSensor::default()),
        SensorSource::ThermalZone(path) => Box::new(ThermalZoneSensor::new(path)),
    };
    info!(
        sensor = ?config.sensor,
        policy = ?config.policy,
        high = config.defaults.high_threshold_c,
        low = config.defaults.low_threshold_c,
        "configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller = HysteresisController::new(Arc::clone(&state), sensor, LogActuator::new(), Arc::clone(&metrics))
        .with_period(config.tick);
    let control_task = tokio::spawn(controller.run(shutdown_rx.clone()));

    let modbus_listener = TcpListener::bind(config.modbus_addr).await?;
    let modbus_task = tokio::spawn(modbus_server::serve(
        modbus_listener,
        register_adapter,
        shutdown_rx.clone(),
    ));

    let node_listener = TcpListener::bind(config.node_addr).await?;
    let node_task = tokio::spawn(node_server::serve(node_listener, node_adapter, shutdown_rx.clone()));

    let metrics_log = Arc::clone(&metrics);
    let metrics_task = tokio::spawn(async move {
        let mut interval = time::interval(METRICS_LOG_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            match serde_json::to_string(&metrics_log.snapshot()) {
                Ok(json) => info!("📊 METRICS: {}", json),
                Err(e) => error!("Failed to encode metrics: {}", e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();

    control_task.await?;
    for (name, task) in [("modbus", modbus_task), ("node", node_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} server error: {}", name, e),
            Err(e) => error!("{} server task failed: {}", name, e),
        }
    }
    metrics_task.abort();

    println!("🛑 fanbus controller stopped");
    Ok(())
}
