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

// Live subscription to the device uplink topic
//
// State machine:
//   Disconnected -> Connecting -> Connected -> (error) Backoff -> Connecting ...
// Disconnected is terminal only after a stop request. The backoff is fixed:
// there is one long-lived broker endpoint, not a fleet to spread load over.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::pipeline::{ForwardStats, PipelineCounters, RecordPipeline};
use crate::session::StopSignal;
use crate::transport::{BrokerTransport, TransportError, CONNACK_ACCEPTED};
use crate::uplink::{RawUplink, RecordOrigin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Counters readable while the subscriber runs
#[derive(Debug, Default)]
pub struct LiveCounters {
    running: AtomicBool,
    connection_attempts: AtomicU64,
    received: AtomicU64,
    undecodable: AtomicU64,
    pipeline: PipelineCounters,
}

impl LiveCounters {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LiveStats {
        LiveStats {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            stats: self.pipeline.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    pub connection_attempts: u64,
    pub received: u64,
    pub undecodable: u64,
    pub stats: ForwardStats,
}

pub struct LiveSubscriber {
    transport: Box<dyn BrokerTransport>,
    topic: String,
    backoff: Duration,
    pipeline: Arc<RecordPipeline>,
    counters: Arc<LiveCounters>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl LiveSubscriber {
    pub fn new(
        transport: Box<dyn BrokerTransport>,
        topic: String,
        backoff: Duration,
        pipeline: Arc<RecordPipeline>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(64);
        Self {
            transport,
            topic,
            backoff,
            pipeline,
            counters: Arc::new(LiveCounters::default()),
            state,
            transitions,
        }
    }

    pub fn counters(&self) -> Arc<LiveCounters> {
        self.counters.clone()
    }

    /// Watch connection state transitions
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Every state change in order, including ones a watch receiver would
    /// coalesce
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Live subscriber state");
            let _ = self.transitions.send(next);
        }
    }

    /// Run until `stop` fires. The stop is observed while connecting, while
    /// waiting for messages, while a record is in the pipeline and during
    /// backoff. An interrupted record counts as failed.
    pub async fn run(mut self, mut stop: StopSignal) -> LiveStats {
        self.counters.running.store(true, Ordering::Release);
        info!(topic = %self.topic, "Starting live subscriber");

        let mut seq = 0u64;
        while !stop.is_stopped() {
            match self.state() {
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    self.transition(ConnectionState::Connecting);
                    self.counters.connection_attempts.fetch_add(1, Ordering::Relaxed);

                    let result = tokio::select! {
                        result = self.transport.connect() => result,
                        _ = stop.stopped() => break,
                    };

                    match result {
                        Ok(CONNACK_ACCEPTED) => {
                            info!("Connected to broker");
                            self.transition(ConnectionState::Connected);
                            match self.transport.subscribe(&self.topic).await {
                                Ok(()) => info!(topic = %self.topic, "Subscribed"),
                                Err(e) => {
                                    error!(component = "live", topic = %self.topic, error = %e, "Subscribe failed");
                                    self.transition(ConnectionState::Backoff);
                                }
                            }
                        }
                        Ok(code) => {
                            error!(component = "live", reason_code = code, "Failed to connect, broker refused");
                            self.transition(ConnectionState::Connected);
                            self.transition(ConnectionState::Backoff);
                        }
                        Err(e) => {
                            error!(component = "live", error = %e, "Broker connection failed");
                            self.transition(ConnectionState::Backoff);
                        }
                    }
                }

                ConnectionState::Connected => {
                    let received = tokio::select! {
                        received = self.transport.recv() => received,
                        _ = stop.stopped() => break,
                    };

                    match received {
                        Ok(payload) => {
                            self.counters.received.fetch_add(1, Ordering::Relaxed);
                            match RawUplink::from_slice(&payload) {
                                Ok(raw) => {
                                    seq += 1;
                                    info!(record = %raw.label(), "Received new sensor data");
                                    let processed = tokio::select! {
                                        outcome = self.pipeline.process(&raw, RecordOrigin::Realtime, seq) => Some(outcome),
                                        _ = stop.stopped() => None,
                                    };
                                    match processed {
                                        Some(outcome) => self.counters.pipeline.record(&outcome),
                                        None => {
                                            self.counters.pipeline.record_interrupted();
                                            warn!(component = "live", record = %raw.label(), "Stop requested while forwarding, record dropped");
                                            break;
                                        }
                                    }
                                }
                                Err(e) => {
                                    self.counters.undecodable.fetch_add(1, Ordering::Relaxed);
                                    warn!(component = "live", bytes = payload.len(), error = %e, "Dropping malformed message");
                                }
                            }
                        }
                        Err(e @ TransportError::Subscribe(_)) => {
                            error!(component = "live", topic = %self.topic, error = %e, "Subscription refused");
                            self.transition(ConnectionState::Backoff);
                        }
                        Err(e) => {
                            error!(component = "live", error = %e, "Broker connection dropped");
                            self.transition(ConnectionState::Backoff);
                        }
                    }
                }

                ConnectionState::Backoff => {
                    self.transport.disconnect().await;
                    info!(backoff = ?self.backoff, "Waiting before reconnect");
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {
                            self.transition(ConnectionState::Connecting);
                        }
                        _ = stop.stopped() => break,
                    }
                }
            }
        }

        self.transport.disconnect().await;
        self.transition(ConnectionState::Disconnected);
        self.counters.running.store(false, Ordering::Release);

        let stats = self.counters.snapshot();
        info!(
            received = stats.received,
            forwarded = stats.stats.forwarded,
            "Live subscriber stopped"
        );
        stats
    }
}
