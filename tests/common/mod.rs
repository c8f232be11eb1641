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

// In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use ttn_relay::backfill::{BackfillWindow, FetchError, UplinkBatch, UplinkSource};
use ttn_relay::{
    BrokerTransport, ForwardError, ForwardOutcome, MappedRecord, RawUplink, Sink, TransportError,
    TransportFactory,
};

pub fn uplink(seconds: u32, decoded: Value) -> Value {
    json!({
        "end_device_ids": {"device_id": "lht65n-01-temp-humidity-sensor"},
        "correlation_ids": [format!("as:up:{:04}", seconds)],
        "received_at": format!("2025-03-01T05:00:{:02}Z", seconds),
        "uplink_message": {"decoded_payload": decoded}
    })
}

/// Sink that records every call and answers from a script
/// (default: accepted with increasing entry ids)
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Mutex<Vec<(MappedRecord, Instant)>>,
    pub responses: Mutex<VecDeque<Result<ForwardOutcome, ForwardError>>>,
    /// Time each forward takes before answering
    pub latency: Duration,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn respond(&self, response: Result<ForwardOutcome, ForwardError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn records(&self) -> Vec<MappedRecord> {
        self.calls.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn forward(&self, record: &MappedRecord) -> Result<ForwardOutcome, ForwardError> {
        let entry_id = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((record.clone(), Instant::now()));
            calls.len() as u64
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(ForwardOutcome::Accepted { entry_id }))
    }

    fn sink_type(&self) -> &str {
        "recording"
    }
}

/// Backfill source returning fixed records, or a fixed failure
pub struct StaticSource {
    pub records: Vec<Value>,
    pub fail_status: Option<u16>,
    pub fetches: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn with_records(records: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            records,
            fail_status: None,
            fetches: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            records: Vec::new(),
            fail_status: Some(status),
            fetches: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UplinkSource for StaticSource {
    async fn fetch(&self, window: &BackfillWindow) -> Result<UplinkBatch, FetchError> {
        self.fetches.lock().unwrap().push(window.to_string());
        if let Some(status) = self.fail_status {
            return Err(FetchError::Status {
                status,
                body: "unauthorized".to_string(),
            });
        }
        Ok(UplinkBatch::new(
            self.records.iter().cloned().map(RawUplink::new).collect(),
        ))
    }
}

/// What the broker does, consumed in order. An exhausted queue blocks
/// forever, like an idle broker.
#[derive(Default)]
pub struct BrokerScript {
    pub connects: VecDeque<Result<u8, TransportError>>,
    pub messages: VecDeque<Result<Bytes, TransportError>>,
    pub panic_on_recv: bool,
    pub hang_on_disconnect: bool,
}

#[derive(Debug, Default)]
pub struct BrokerLog {
    pub connects: usize,
    pub subscribed: Vec<String>,
    pub disconnects: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedBroker {
    pub script: Arc<Mutex<BrokerScript>>,
    pub log: Arc<Mutex<BrokerLog>>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_connection(&self) -> &Self {
        self.script.lock().unwrap().connects.push_back(Ok(0));
        self
    }

    pub fn refuse_connection(&self, code: u8) -> &Self {
        self.script.lock().unwrap().connects.push_back(Ok(code));
        self
    }

    pub fn deliver(&self, payload: impl Into<Bytes>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .messages
            .push_back(Ok(payload.into()));
        self
    }

    pub fn drop_connection(&self) -> &Self {
        self.script
            .lock()
            .unwrap()
            .messages
            .push_back(Err(TransportError::Connection("connection reset".to_string())));
        self
    }

    /// Broker answers the subscription with a failure code
    pub fn refuse_subscription(&self) -> &Self {
        self.script
            .lock()
            .unwrap()
            .messages
            .push_back(Err(TransportError::Subscribe(
                "broker refused subscription (packet 1)".to_string(),
            )));
        self
    }

    pub fn transport(&self) -> Box<dyn BrokerTransport> {
        Box::new(ScriptedTransport {
            broker: self.clone(),
        })
    }
}

impl TransportFactory for ScriptedBroker {
    fn create(&self) -> Box<dyn BrokerTransport> {
        self.transport()
    }
}

pub struct ScriptedTransport {
    broker: ScriptedBroker,
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<u8, TransportError> {
        self.broker.log.lock().unwrap().connects += 1;
        let next = self.broker.script.lock().unwrap().connects.pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.broker.log.lock().unwrap().subscribed.push(topic.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let (next, panic) = {
            let mut script = self.broker.script.lock().unwrap();
            (script.messages.pop_front(), script.panic_on_recv)
        };
        if panic {
            panic!("transport fault");
        }
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        self.broker.log.lock().unwrap().disconnects += 1;
        let hang = self.broker.script.lock().unwrap().hang_on_disconnect;
        if hang {
            std::future::pending::<()>().await;
        }
    }
}
