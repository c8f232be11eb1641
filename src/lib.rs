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

// TTN to ThingSpeak telemetry relay
//
// Relays uplinks of a single LoRaWAN device:
// - Backfills a look-back window from the TTN storage integration
// - Then follows the device's MQTT uplink topic live
// - Maps decoded payload fields onto ThingSpeak channel fields
// - Optionally archives raw uplinks to a filesystem or Azure Blob Storage
// - Runs at most one session at a time, once or on a daily schedule

pub mod archive;
pub mod backfill;
pub mod config;
pub mod coordinator;
pub mod live;
pub mod pipeline;
pub mod schedule;
pub mod session;
pub mod sink;
pub mod transport;
pub mod uplink;

// Re-export main types
pub use archive::{ArchiveBackend, ArchiveFactory, ArchiveOutcome, ArchiveWriter};
pub use backfill::{Backfill, BackfillReport, BackfillWindow, StorageApiClient, UplinkBatch, UplinkSource};
pub use config::{load_config, load_config_with_env, RelayConfig};
pub use coordinator::{CoordinatorSettings, RelayCoordinator, RelayError, SessionEnd, SessionReport};
pub use live::{ConnectionState, LiveStats, LiveSubscriber};
pub use pipeline::{ForwardStats, RecordPipeline};
pub use schedule::DailySchedule;
pub use session::{stop_channel, RelaySession, SessionMode, StopHandle, StopSignal};
pub use sink::{ForwardError, ForwardOutcome, Sink, ThingSpeakSink};
pub use transport::{BrokerTransport, MqttTransport, MqttTransportFactory, TransportError, TransportFactory};
pub use uplink::{FieldMapper, MappedRecord, RawUplink, RecordOrigin};
