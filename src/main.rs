// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ttn_relay::config::{apply_env_overrides, load_config, ConfigLoader, LoggingConfig};
use ttn_relay::{stop_channel, DailySchedule, RelayCoordinator, StopSignal};

/// TTN Relay - forward LoRaWAN sensor uplinks to ThingSpeak
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Device ID (overrides config file and TTN_DEVICE_ID)
    #[arg(short, long)]
    device_id: Option<String>,

    /// Run a single session and exit, ignoring relay.schedule
    #[arg(long)]
    once: bool,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file, then environment, then CLI overrides
    let mut config = load_config(&args.config)?;
    apply_env_overrides(&mut config)?;
    if let Some(device_id) = args.device_id {
        config.broker.device_id = device_id;
    }

    // Missing credentials are fatal here, before any connection attempt
    ConfigLoader::validate(&config)?;

    init_tracing(&config.logging)?;

    info!("Starting TTN Relay");
    info!("Loaded configuration from: {:?}", args.config);
    info!("Device ID: {}", config.broker.device_id);
    info!("Broker: {}:{}", config.broker.host, config.broker.port);
    info!("Archive backend: {}", config.archive.backend);

    let coordinator = RelayCoordinator::from_config(&config).await?;

    // Ctrl+C cancels the running session cooperatively
    let (stop_handle, cancel) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
        stop_handle.stop();
    });

    let schedule = match (&config.relay.schedule, args.once) {
        (Some(at), false) => Some(DailySchedule::parse(at)?),
        _ => None,
    };

    match schedule {
        None => run_once(&coordinator, cancel).await,
        Some(schedule) => run_daily(&coordinator, schedule, cancel).await,
    }

    info!("TTN Relay shut down successfully");
    Ok(())
}

async fn run_once(coordinator: &RelayCoordinator, cancel: StopSignal) {
    match coordinator.run_session(cancel).await {
        Ok(report) => match serde_json::to_string(&report) {
            Ok(summary) => info!(report = %summary, "Session report"),
            Err(e) => error!("Failed to serialize session report: {}", e),
        },
        Err(e) => error!("Relay session error: {}", e),
    }
}

async fn run_daily(coordinator: &RelayCoordinator, schedule: DailySchedule, mut cancel: StopSignal) {
    loop {
        let now = Utc::now();
        info!("Next relay session at {}", schedule.next_after(now));

        tokio::select! {
            _ = tokio::time::sleep(schedule.delay_from(now)) => {}
            _ = cancel.stopped() => return,
        }

        run_once(coordinator, cancel.clone()).await;
        if cancel.is_stopped() {
            return;
        }
    }
}
