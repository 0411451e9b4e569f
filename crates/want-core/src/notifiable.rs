//! Per-Want notification intake (spec §4.J): a bounded buffer each Want
//! drains on its own reconcile tick, plus the subscription-matching logic
//! used by `NotificationBus::emit_state_change`.

use std::collections::VecDeque;

use tokio::sync::Mutex;
use want_types::{Dynamic, StateSubscription};

use crate::error::{EngineError, Result};
use crate::notify::StateNotification;

/// Every Want (not just monitors) carries one of these so peer Wants can
/// subscribe to its state without holding a strong reference to it.
/// Default buffer depth (spec §4.J); `MonitorWant` overrides to 200.
pub const NOTIFIABLE_BUFFER_CAPACITY: usize = 100;
pub const MONITOR_NOTIFIABLE_BUFFER_CAPACITY: usize = 200;

pub struct NotifiableBase {
    subscriptions: Vec<StateSubscription>,
    inbox: Mutex<VecDeque<StateNotification>>,
    capacity: usize,
}

impl NotifiableBase {
    pub fn new(subscriptions: Vec<StateSubscription>) -> Self {
        Self::with_capacity(subscriptions, NOTIFIABLE_BUFFER_CAPACITY)
    }

    /// A base sized for `MonitorWant`'s wider alert buffer (spec §4.J).
    pub fn for_monitor(subscriptions: Vec<StateSubscription>) -> Self {
        Self::with_capacity(subscriptions, MONITOR_NOTIFIABLE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(subscriptions: Vec<StateSubscription>, capacity: usize) -> Self {
        Self {
            subscriptions,
            inbox: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Whether this Want's subscriptions match a change from `source` on
    /// `key`: the subscription names `source` and either declares no key
    /// filter or includes `key` explicitly.
    pub fn subscribes_to(&self, source: &str, key: &str) -> bool {
        self.subscriptions.iter().any(|sub| {
            sub.want_name == source && (sub.state_keys.is_empty() || sub.state_keys.iter().any(|k| k == key))
        })
    }

    /// Push a delivered notification, evaluating any declared conditions.
    /// Non-blocking: a full buffer returns an error and the incoming event
    /// is dropped for this subscriber rather than evicting older history a
    /// reconciler hasn't drained yet (spec §4.J, §7 "notification buffer
    /// overflow").
    pub async fn push(&self, note: StateNotification) -> Result<()> {
        if let Some(sub) = self
            .subscriptions
            .iter()
            .find(|sub| sub.want_name == note.source)
        {
            if !conditions_match(sub, &note.value) {
                return Ok(());
            }
        }

        let mut inbox = self.inbox.lock().await;
        if inbox.len() >= self.capacity {
            return Err(EngineError::NotificationBufferFull);
        }
        inbox.push_back(note);
        Ok(())
    }

    pub async fn drain(&self) -> Vec<StateNotification> {
        let mut inbox = self.inbox.lock().await;
        inbox.drain(..).collect()
    }

    pub fn subscriptions(&self) -> &[StateSubscription] {
        &self.subscriptions
    }
}

fn conditions_match(sub: &StateSubscription, value: &Dynamic) -> bool {
    if sub.conditions.is_empty() {
        return true;
    }
    // A condition map of {"equals": <value>} (or any single entry) is
    // checked by render-equality against the incoming value; any other
    // shape is treated as "no constraint on this key" since the condition
    // language only covers equality (spec §4.J Non-goals).
    sub.conditions
        .get("equals")
        .map(|expected| want_types::render_eq(expected, value))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::notify::NotificationKind;
    use std::collections::BTreeMap;

    fn note(source: &str, key: &str, value: Dynamic) -> StateNotification {
        StateNotification {
            source: source.to_string(),
            target: None,
            key: key.to_string(),
            value,
            previous: None,
            timestamp: Utc::now(),
            kind: NotificationKind::StateChange,
        }
    }

    #[tokio::test]
    async fn hundred_and_first_send_to_a_full_buffer_errors() {
        let base = NotifiableBase::new(vec![]);
        for i in 0..NOTIFIABLE_BUFFER_CAPACITY {
            base.push(note("source", "k", Dynamic::Int(i as i64))).await.unwrap();
        }
        let overflow = base.push(note("source", "k", Dynamic::Int(999))).await;
        assert!(matches!(overflow, Err(EngineError::NotificationBufferFull)));

        let drained = base.drain().await;
        assert_eq!(drained.len(), NOTIFIABLE_BUFFER_CAPACITY);
        // the dropped event was the new one, not the oldest
        assert_eq!(drained[0].value, Dynamic::Int(0));
    }

    #[tokio::test]
    async fn monitor_base_has_wider_buffer() {
        let base = NotifiableBase::for_monitor(vec![]);
        for i in 0..MONITOR_NOTIFIABLE_BUFFER_CAPACITY {
            base.push(note("source", "k", Dynamic::Int(i as i64))).await.unwrap();
        }
        assert!(base.push(note("source", "k", Dynamic::Int(0))).await.is_err());
    }

    #[tokio::test]
    async fn condition_filters_non_matching_values() {
        let mut conditions = BTreeMap::new();
        conditions.insert("equals".to_string(), Dynamic::String("confirmed".into()));
        let base = NotifiableBase::new(vec![StateSubscription {
            want_name: "booking".into(),
            state_keys: vec!["status".into()],
            conditions,
        }]);

        base.push(note("booking", "status", Dynamic::String("pending".into())))
            .await
            .unwrap();
        base.push(note("booking", "status", Dynamic::String("confirmed".into())))
            .await
            .unwrap();

        let drained = base.drain().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].value, Dynamic::String("confirmed".into()));
    }
}
