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

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Create a linked stop handle / signal pair
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx: Some(rx) })
}

/// Requests a cooperative stop
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Observes a stop request
///
/// Dropping the `StopHandle` counts as a stop request, so a worker never
/// outlives its owner.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_stopped(&self) -> bool {
        match &self.rx {
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Resolves once a stop was requested
    pub async fn stopped(&mut self) {
        match &mut self.rx {
            Some(rx) => {
                let _ = rx.wait_for(|stopped| *stopped).await;
            }
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Backfill,
    Live,
}

/// One coordinator run: backfill, then a live phase until its deadline
#[derive(Debug)]
pub struct RelaySession {
    id: Uuid,
    started_at: DateTime<Utc>,
    mode: SessionMode,
    deadline: Option<Instant>,
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode: SessionMode::Backfill,
            deadline: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Switch to the live phase; the deadline counts from now. A duration
    /// past the clock's range leaves the phase unbounded.
    pub fn enter_live(&mut self, duration: Option<std::time::Duration>) {
        self.mode = SessionMode::Live;
        self.deadline = duration.and_then(|d| Instant::now().checked_add(d));
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while a session is active; releases the slot on drop
#[derive(Debug)]
pub struct SessionGuard {
    active: Arc<AtomicBool>,
}

impl SessionGuard {
    /// `None` if another session already holds the slot
    pub fn acquire(active: &Arc<AtomicBool>) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                active: active.clone(),
            })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
