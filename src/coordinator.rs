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
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::archive::{ArchiveFactory, ArchiveWriter};
use crate::backfill::{Backfill, BackfillReport, BackfillWindow, StorageApiClient, UplinkSource};
use crate::config::RelayConfig;
use crate::live::{LiveStats, LiveSubscriber};
use crate::pipeline::RecordPipeline;
use crate::session::{stop_channel, RelaySession, SessionGuard, StopSignal};
use crate::sink::ThingSpeakSink;
use crate::transport::{MqttTransportFactory, TransportFactory};
use crate::uplink::FieldMapper;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("a relay session is already active")]
    SessionActive,
}

/// Timing knobs for one session
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub backfill_window: BackfillWindow,
    pub inter_record_delay: Duration,
    /// Live phase length; `None` runs until cancelled
    pub live_duration: Option<Duration>,
    pub stop_timeout: Duration,
    pub topic: String,
    pub backoff: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Ok(Self {
            backfill_window: BackfillWindow::parse(&config.relay.backfill_window)?,
            inter_record_delay: config.relay.inter_record_delay(),
            live_duration: config.relay.live_duration(),
            stop_timeout: config.relay.stop_timeout(),
            topic: config.broker.uplink_topic(),
            backoff: config.broker.backoff(),
        })
    }
}

/// Why the live phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    DeadlineElapsed,
    Cancelled,
    /// Subscriber returned on its own
    SubscriberExited,
    /// Subscriber panicked; the fault stopped at the coordinator
    SubscriberCrashed,
    /// Subscriber did not acknowledge the stop in time and was aborted
    StopTimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub backfill: BackfillReport,
    pub live: LiveStats,
    pub end: SessionEnd,
}

/// Runs backfill, then a live subscription, one session at a time
pub struct RelayCoordinator {
    settings: CoordinatorSettings,
    source: Arc<dyn UplinkSource>,
    pipeline: Arc<RecordPipeline>,
    transports: Arc<dyn TransportFactory>,
    active: Arc<AtomicBool>,
}

impl RelayCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        source: Arc<dyn UplinkSource>,
        pipeline: Arc<RecordPipeline>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            settings,
            source,
            pipeline,
            transports,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire production collaborators: TTN storage API, MQTT, ThingSpeak and
    /// the configured archive backend
    pub async fn from_config(config: &RelayConfig) -> Result<Self> {
        let settings = CoordinatorSettings::from_config(config)?;

        let sink = Arc::new(ThingSpeakSink::new(&config.sink)?);
        if config.sink.api_key.is_none() {
            warn!("ThingSpeak API key not configured, records will not be forwarded");
        }

        let archive_backend = ArchiveFactory::create(&config.archive)?;
        if let Some(backend) = &archive_backend {
            info!("Archive backend initialized: {}", backend.backend_type());
            if let Err(e) = backend.initialize().await {
                warn!(backend = backend.backend_type(), error = %e, "Archive initialization failed, continuing");
            }
        }

        let pipeline = Arc::new(RecordPipeline::new(
            FieldMapper::from_config(&config.sink),
            sink,
            ArchiveWriter::new(archive_backend),
        ));
        let source = Arc::new(StorageApiClient::new(
            &config.broker,
            config.relay.backfill_timeout(),
        )?);
        let transports = Arc::new(MqttTransportFactory::new(config.broker.clone()));

        Ok(Self::new(settings, source, pipeline, transports))
    }

    /// Trigger entry point: one full session, no cancellation, nothing returned
    pub async fn run(&self) {
        if let Err(e) = self.run_session(StopSignal::never()).await {
            warn!("Relay session not started: {}", e);
        }
    }

    /// One session: backfill to completion, then live until the deadline or
    /// `cancel` fires. Only a concurrent session is an error; every
    /// per-record and connection fault is contained below this call.
    pub async fn run_session(&self, mut cancel: StopSignal) -> Result<SessionReport, RelayError> {
        let _guard = SessionGuard::acquire(&self.active).ok_or(RelayError::SessionActive)?;
        let mut session = RelaySession::new();

        info!(session = %session.id(), "Starting relay session");

        // Backfill failures never prevent the live phase
        let backfill = Backfill::new(
            self.source.clone(),
            self.pipeline.clone(),
            self.settings.backfill_window.clone(),
            self.settings.inter_record_delay,
        )
        .run()
        .await;
        info!(
            session = %session.id(),
            fetched = backfill.fetched,
            forwarded = backfill.stats.forwarded,
            "Processed historical records"
        );

        session.enter_live(self.settings.live_duration);

        let subscriber = LiveSubscriber::new(
            self.transports.create(),
            self.settings.topic.clone(),
            self.settings.backoff,
            self.pipeline.clone(),
        );
        let counters = subscriber.counters();
        let (stop_handle, stop_signal) = stop_channel();
        let mut handle: JoinHandle<LiveStats> = tokio::spawn(subscriber.run(stop_signal));

        let deadline = session.deadline();
        let mut end = tokio::select! {
            _ = sleep_until(deadline) => SessionEnd::DeadlineElapsed,
            _ = cancel.stopped() => SessionEnd::Cancelled,
            joined = &mut handle => Self::joined_end(joined),
        };

        let still_running = matches!(end, SessionEnd::DeadlineElapsed | SessionEnd::Cancelled);
        if still_running {
            info!(session = %session.id(), reason = ?end, "Stopping live subscriber");
            stop_handle.stop();

            match tokio::time::timeout(self.settings.stop_timeout, &mut handle).await {
                Ok(joined) => {
                    if Self::joined_end(joined) == SessionEnd::SubscriberCrashed {
                        end = SessionEnd::SubscriberCrashed;
                    }
                }
                Err(_) => {
                    warn!(
                        session = %session.id(),
                        timeout = ?self.settings.stop_timeout,
                        "Live subscriber did not stop in time, aborting"
                    );
                    handle.abort();
                    end = SessionEnd::StopTimedOut;
                }
            }
        }

        let report = SessionReport {
            session_id: session.id().to_string(),
            started_at: session.started_at(),
            backfill,
            live: counters.snapshot(),
            end,
        };

        info!(
            session = %report.session_id,
            end = ?report.end,
            live_received = report.live.received,
            live_forwarded = report.live.stats.forwarded,
            "Relay session completed"
        );

        Ok(report)
    }

    fn joined_end(joined: Result<LiveStats, tokio::task::JoinError>) -> SessionEnd {
        match joined {
            Ok(_) => SessionEnd::SubscriberExited,
            Err(e) => {
                error!(component = "coordinator", error = %e, "Live subscriber crashed");
                SessionEnd::SubscriberCrashed
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
