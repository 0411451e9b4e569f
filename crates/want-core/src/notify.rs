//! Notification / subscription system (spec §4.H): a single process-wide
//! bus that fans state/parameter changes out to peer subscribers and the
//! owner chain, and keeps a bounded ring for debugging.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use want_types::Dynamic;

use crate::want::Want;

pub const NOTIFICATION_RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StateChange,
    ParameterChange,
    OwnerChildStateEvent,
    StatusChange,
    ProcessEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateNotification {
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    pub key: String,
    pub value: Dynamic,
    #[serde(default)]
    pub previous: Option<Dynamic>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

struct BusInner {
    wants: HashMap<String, Weak<Want>>,
    ring: VecDeque<StateNotification>,
}

/// The global name->Want registry and notification fan-out bus. One
/// instance per engine process (design note §9: "a single global bus
/// registry referencing Wants by name" breaks the Want<->subscription
/// reference cycle — the bus only holds weak handles).
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<Mutex<BusInner>>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                wants: HashMap::new(),
                ring: VecDeque::new(),
            })),
        }
    }

    pub async fn register(&self, want: &Arc<Want>) {
        let mut inner = self.inner.lock().await;
        inner.wants.insert(want.name().to_string(), Arc::downgrade(want));
    }

    pub async fn unregister(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        inner.wants.remove(name);
    }

    async fn record(&self, notification: StateNotification) {
        let mut inner = self.inner.lock().await;
        inner.ring.push_back(notification);
        while inner.ring.len() > NOTIFICATION_RING_CAPACITY {
            inner.ring.pop_front();
        }
    }

    /// Emit a state-change notification: deliver to peer subscribers whose
    /// `StateSubscription` matches, and to every owner in the source's
    /// controller chain as an `OwnerChildStateEvent`.
    pub async fn emit_state_change(
        &self,
        source: &Arc<Want>,
        key: &str,
        value: Dynamic,
        previous: Option<Dynamic>,
    ) {
        let note = StateNotification {
            source: source.name().to_string(),
            target: None,
            key: key.to_string(),
            value,
            previous,
            timestamp: Utc::now(),
            kind: NotificationKind::StateChange,
        };
        self.record(note.clone()).await;

        let peers = self.snapshot_wants().await;
        for (name, peer) in &peers {
            if name == source.name() {
                continue;
            }
            if peer.subscribes_to(source.name(), &note.key).await {
                let mut delivered = note.clone();
                delivered.target = Some(name.clone());
                deliver(peer, delivered).await;
            }
        }

        for owner_name in source.controller_owner_names().await {
            if let Some(owner) = peers.get(&owner_name) {
                let mut owner_note = note.clone();
                owner_note.kind = NotificationKind::OwnerChildStateEvent;
                owner_note.target = Some(owner_name.clone());
                deliver(owner, owner_note).await;
            }
        }
    }

    pub async fn emit_status_change(&self, source_name: &str, value: Dynamic, previous: Dynamic) {
        let note = StateNotification {
            source: source_name.to_string(),
            target: None,
            key: "status".to_string(),
            value,
            previous: Some(previous),
            timestamp: Utc::now(),
            kind: NotificationKind::StatusChange,
        };
        self.record(note).await;
    }

    pub async fn emit_process_end(&self, source: &Arc<Want>, success: bool) {
        let note = StateNotification {
            source: source.name().to_string(),
            target: None,
            key: "process_end".to_string(),
            value: Dynamic::Bool(success),
            previous: None,
            timestamp: Utc::now(),
            kind: NotificationKind::ProcessEnd,
        };
        self.record(note).await;
    }

    /// Parameter changes on a parent force owned children back to idle so
    /// they restart on the next reconcile pass.
    pub async fn emit_parameter_change(&self, source_name: &str, changes: &want_types::DynamicMap) {
        for (key, value) in changes {
            let note = StateNotification {
                source: source_name.to_string(),
                target: None,
                key: key.clone(),
                value: value.clone(),
                previous: None,
                timestamp: Utc::now(),
                kind: NotificationKind::ParameterChange,
            };
            self.record(note).await;
        }

        let peers = self.snapshot_wants().await;
        for (name, peer) in &peers {
            if peer.is_controlled_by(source_name).await {
                debug!(parent = source_name, child = name, "resetting child to idle after parameter change");
                peer.reset_to_idle_for_restart().await;
            }
        }
    }

    async fn snapshot_wants(&self) -> HashMap<String, Arc<Want>> {
        let inner = self.inner.lock().await;
        inner
            .wants
            .iter()
            .filter_map(|(k, w)| w.upgrade().map(|w| (k.clone(), w)))
            .collect()
    }

    pub async fn recent(&self, n: usize) -> Vec<StateNotification> {
        let inner = self.inner.lock().await;
        inner.ring.iter().rev().take(n).cloned().collect()
    }

    pub async fn for_want(&self, name: &str) -> Vec<StateNotification> {
        let inner = self.inner.lock().await;
        inner
            .ring
            .iter()
            .filter(|n| n.source == name || n.target.as_deref() == Some(name))
            .cloned()
            .collect()
    }
}

async fn deliver(want: &Arc<Want>, note: StateNotification) {
    if let Err(err) = want.on_state_update(note).await {
        debug!(want = want.name(), error = %err, "dropped notification for full subscriber buffer");
    }
}
