//! Sensor monitor
//!
//! Polls the configured devices through the gateway and prints every reading
//! until Ctrl-C.
//!
//! Usage: cargo run --bin monitor -- --gateway <host> --devices <ids>
//! Example: cargo run --bin monitor -- --gateway 192.168.16.200 --devices 4,5

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn, Level};

use modbus_ws_poller::{
    parse_device_ids, DeviceConfig, DeviceReading, MonitorConfig, MonitorEvents, PollScheduler,
    SessionState, SlaveId, WebSocketConnector,
};

#[derive(Parser, Debug)]
#[command(name = "monitor", version, about = "Poll Modbus sensors through a WebSocket gateway")]
struct Args {
    /// Gateway host or IP address
    #[arg(short, long)]
    gateway: Option<String>,

    /// Gateway port
    #[arg(short, long)]
    port: Option<u16>,

    /// WebSocket path on the gateway
    #[arg(long)]
    path: Option<String>,

    /// Comma-separated unit ids, e.g. "4,5"
    #[arg(short, long)]
    devices: Option<String>,

    /// Pause between poll rounds in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hex dump every frame
    #[arg(long)]
    packet_log: bool,

    /// Debug output
    #[arg(short, long)]
    verbose: bool,
}

/// Prints readings and connection changes to stdout
struct ConsoleEvents;

impl MonitorEvents for ConsoleEvents {
    fn on_reading(&self, unit_id: SlaveId, reading: &DeviceReading) {
        println!(
            "[{}] unit {:>3}: {}",
            reading.timestamp.format("%H:%M:%S%.3f"),
            unit_id,
            reading.sample
        );
    }

    fn on_state_change(&self, state: SessionState) {
        println!("🔌 Gateway {}", state);
    }
}

fn build_config(args: &Args) -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };

    if let Some(host) = &args.gateway {
        config.gateway.host = host.clone();
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    if let Some(path) = &args.path {
        config.gateway.path = path.clone();
    }
    if let Some(devices) = &args.devices {
        config.devices = parse_device_ids(devices)?
            .into_iter()
            .map(DeviceConfig::new)
            .collect();
    }
    if let Some(interval) = args.interval {
        config.poll_interval_ms = interval;
    }
    config.packet_logging |= args.packet_log;

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose || args.packet_log {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = build_config(&args)?;

    println!("📡 {}", modbus_ws_poller::info());
    println!("   Gateway:  {}", config.gateway);
    for device in &config.devices {
        println!("   Device:   unit {} ({})", device.id, device.class());
    }
    println!("   Interval: {}ms\n", config.poll_interval_ms);

    let scheduler = Arc::new(
        PollScheduler::connect(WebSocketConnector::new(), &config, Arc::new(ConsoleEvents)).await?,
    );

    let poller = scheduler.clone();
    let mut runner = tokio::spawn(async move { poller.run().await });

    let result = tokio::select! {
        joined = &mut runner => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping after the current round");
            scheduler.stop();
            runner.await?
        }
    };

    if let Err(e) = scheduler.session().close().await {
        warn!("Closing the gateway link failed: {}", e);
    }

    let stats = scheduler.session().stats();
    println!("\n📊 Transport statistics");
    println!("   Requests sent:      {}", stats.requests_sent);
    println!("   Responses received: {}", stats.responses_received);
    println!("   Timeouts:           {}", stats.timeouts);
    println!("   Late frames:        {}", stats.late_frames);
    println!("   Reconnects:         {}", stats.reconnects);
    println!("   Errors:             {}", stats.errors);

    for device in scheduler.devices() {
        if let Some(last) = scheduler.last_reading(device.id) {
            println!("   Last unit {}: {}", device.id, last.sample);
        }
    }

    result?;
    Ok(())
}
