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

mod common;

use common::{uplink, RecordingSink, ScriptedBroker, StaticSource};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use ttn_relay::archive::FilesystemBackend;
use ttn_relay::config::{default_field_sources, FilesystemConfig};
use ttn_relay::{
    stop_channel, ArchiveBackend, ArchiveWriter, BackfillWindow, CoordinatorSettings,
    FieldMapper, RecordPipeline, RelayCoordinator, RelayError, SessionEnd, Sink, StopSignal,
    ThingSpeakSink, UplinkSource,
};

const TOPIC: &str = "v3/bd-test-app2@ttn/devices/lht65n-01/up";

fn settings(live_duration: Option<Duration>) -> CoordinatorSettings {
    CoordinatorSettings {
        backfill_window: BackfillWindow::parse("6h").unwrap(),
        inter_record_delay: Duration::from_secs(1),
        live_duration,
        stop_timeout: Duration::from_secs(10),
        topic: TOPIC.to_string(),
        backoff: Duration::from_secs(300),
    }
}

fn coordinator(
    settings: CoordinatorSettings,
    source: Arc<StaticSource>,
    sink: Arc<dyn Sink>,
    archive: ArchiveWriter,
    broker: &ScriptedBroker,
) -> Arc<RelayCoordinator> {
    let source: Arc<dyn UplinkSource> = source;
    let pipeline = Arc::new(RecordPipeline::new(
        FieldMapper::new(default_field_sources(), Some("KEY".to_string())),
        sink,
        archive,
    ));
    Arc::new(RelayCoordinator::new(
        settings,
        source,
        pipeline,
        Arc::new(broker.clone()),
    ))
}

fn sensor_reading(seconds: u32) -> serde_json::Value {
    uplink(
        seconds,
        json!({"field5": 21.5, "field3": 60, "field4": 2, "field1": 3.7}),
    )
}

#[tokio::test(start_paused = true)]
async fn test_zero_deadline_completes_backfill_then_stops() {
    let source = StaticSource::with_records(vec![
        sensor_reading(3),
        sensor_reading(1),
        sensor_reading(2),
    ]);
    let sink = RecordingSink::new();
    let broker = ScriptedBroker::new();
    broker.accept_connection();

    let coordinator = coordinator(
        settings(Some(Duration::ZERO)),
        source,
        sink.clone(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let report = coordinator
        .run_session(StopSignal::never())
        .await
        .expect("session should run");

    assert_eq!(report.end, SessionEnd::DeadlineElapsed);
    assert_eq!(report.backfill.fetched, 3);
    assert_eq!(report.backfill.stats.forwarded, 3);
    assert_eq!(sink.records().len(), 3);
    assert!(broker.log.lock().unwrap().disconnects >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_failure_still_runs_live_phase() {
    let source = StaticSource::failing(401);
    let sink = RecordingSink::new();
    let broker = ScriptedBroker::new();
    broker
        .accept_connection()
        .deliver(sensor_reading(9).to_string());

    let coordinator = coordinator(
        settings(Some(Duration::from_secs(60))),
        source.clone(),
        sink.clone(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let report = coordinator.run_session(StopSignal::never()).await.unwrap();

    assert!(report.backfill.fetch_failed);
    assert_eq!(report.backfill.fetched, 0);
    assert_eq!(source.fetches.lock().unwrap().len(), 1);

    assert_eq!(report.end, SessionEnd::DeadlineElapsed);
    assert_eq!(report.live.received, 1);
    assert_eq!(report.live.stats.forwarded, 1);
    assert_eq!(sink.records()[0].fields, [21.5, 60.0, 2.0, 3.7]);
    assert_eq!(broker.log.lock().unwrap().subscribed, vec![TOPIC.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_open_ended_session() {
    let broker = ScriptedBroker::new();
    broker.accept_connection();

    let coordinator = coordinator(
        settings(None),
        StaticSource::with_records(Vec::new()),
        RecordingSink::new(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let (cancel, signal) = stop_channel();
    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run_session(signal).await })
    };

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(!running.is_finished());

    cancel.stop();
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.end, SessionEnd::Cancelled);
    assert_eq!(broker.log.lock().unwrap().disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_session_is_rejected() {
    let broker = ScriptedBroker::new();

    let coordinator = coordinator(
        settings(Some(Duration::from_secs(60))),
        StaticSource::with_records(Vec::new()),
        RecordingSink::new(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run_session(StopSignal::never()).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    let second = coordinator.run_session(StopSignal::never()).await;
    assert!(matches!(second, Err(RelayError::SessionActive)));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.end, SessionEnd::DeadlineElapsed);

    // The slot is free again once the first session finished
    let third = coordinator.run_session(StopSignal::never()).await.unwrap();
    assert_eq!(third.end, SessionEnd::DeadlineElapsed);
    assert_ne!(third.session_id, first.session_id);
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_crash_is_contained() {
    let broker = ScriptedBroker::new();
    broker.accept_connection();
    broker.script.lock().unwrap().panic_on_recv = true;

    let coordinator = coordinator(
        settings(Some(Duration::from_secs(60))),
        StaticSource::with_records(vec![sensor_reading(1)]),
        RecordingSink::new(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let report = coordinator.run_session(StopSignal::never()).await.unwrap();

    assert_eq!(report.end, SessionEnd::SubscriberCrashed);
    assert_eq!(report.backfill.stats.forwarded, 1);

    // A crashed session does not hold the slot
    broker.script.lock().unwrap().panic_on_recv = false;
    let next = coordinator.run_session(StopSignal::never()).await.unwrap();
    assert_eq!(next.end, SessionEnd::DeadlineElapsed);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_subscriber_is_aborted() {
    let broker = ScriptedBroker::new();
    broker.accept_connection();
    broker.script.lock().unwrap().hang_on_disconnect = true;

    let coordinator = coordinator(
        settings(Some(Duration::from_secs(60))),
        StaticSource::with_records(Vec::new()),
        RecordingSink::new(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let started = tokio::time::Instant::now();
    let report = coordinator.run_session(StopSignal::never()).await.unwrap();

    assert_eq!(report.end, SessionEnd::StopTimedOut);
    assert!(started.elapsed() >= Duration::from_secs(70));
    assert!(started.elapsed() < Duration::from_secs(80));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_slow_forward_releases_connection() {
    let broker = ScriptedBroker::new();
    broker
        .accept_connection()
        .deliver(sensor_reading(5).to_string());
    let sink = RecordingSink::slow(Duration::from_secs(30));

    let coordinator = coordinator(
        settings(Some(Duration::from_millis(1))),
        StaticSource::with_records(Vec::new()),
        sink.clone(),
        ArchiveWriter::disabled(),
        &broker,
    );

    let report = coordinator.run_session(StopSignal::never()).await.unwrap();

    assert_eq!(report.end, SessionEnd::DeadlineElapsed);
    assert_eq!(report.live.received, 1);
    assert_eq!(report.live.stats.failed, 1);
    assert_eq!(report.live.stats.forwarded, 0);
    assert_eq!(broker.log.lock().unwrap().disconnects, 1);
}

#[tokio::test]
async fn test_live_reading_reaches_thingspeak_and_archive() {
    let server = MockServer::start_async().await;
    let update = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/update")
                .query_param("api_key", "KEY")
                .query_param("field1", "21.5")
                .query_param("field2", "60")
                .query_param("field3", "2")
                .query_param("field4", "3.7");
            then.status(200).body("42");
        })
        .await;

    let dir = TempDir::new().unwrap();
    let archive = FilesystemBackend::new(FilesystemConfig {
        base_path: dir.path().to_string_lossy().to_string(),
    })
    .unwrap();
    archive.initialize().await.unwrap();
    let archive: Arc<dyn ArchiveBackend> = Arc::new(archive);

    let reading = sensor_reading(30);
    let broker = ScriptedBroker::new();
    broker.accept_connection().deliver(reading.to_string());

    let sink = Arc::new(
        ThingSpeakSink::with_timeout(server.url("/update"), Duration::from_secs(5)).unwrap(),
    );
    let coordinator = coordinator(
        settings(Some(Duration::from_secs(1))),
        StaticSource::with_records(Vec::new()),
        sink,
        ArchiveWriter::new(Some(archive)),
        &broker,
    );

    let report = coordinator.run_session(StopSignal::never()).await.unwrap();

    update.assert_hits_async(1).await;
    assert_eq!(report.live.stats.forwarded, 1);
    assert_eq!(report.live.stats.archived, 1);

    let mut files = std::fs::read_dir(dir.path().join("realtime"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect::<Vec<_>>();
    assert_eq!(files.len(), 1);
    let file = files.remove(0);
    let name = file.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("realtime_data_"));
    assert!(name.ends_with("_0001.json"));

    let stored: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
    assert_eq!(stored, reading);
}
