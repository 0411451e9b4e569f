//! Monitor Want (spec §4.J, second half): wraps a `Want` whose notification
//! inbox is drained by a background processor loop instead of a reconcile
//! pass, evaluating alert thresholds read from spec params over everything
//! it receives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use want_types::{as_float, Dynamic, WantIdentity, WantMetadata, WantSpec};

use crate::notify::StateNotification;
use crate::want::Want;

const PROCESSOR_TICK: Duration = Duration::from_millis(100);

/// What happens when an alert fires. Both run for every fired alert unless
/// the configured list names only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Log,
    Store,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub source: String,
    pub key: String,
    pub value: Dynamic,
    pub threshold: Dynamic,
    pub triggered_at: DateTime<Utc>,
}

pub struct MonitorWant {
    want: Arc<Want>,
    alerts: Mutex<Vec<Alert>>,
    source_counts: Mutex<HashMap<String, u64>>,
    monitored_sources: Mutex<Vec<String>>,
    actions: Vec<AlertAction>,
    token: CancellationToken,
}

impl MonitorWant {
    pub fn new(identity: WantIdentity, metadata: WantMetadata, spec: WantSpec, actions: Vec<AlertAction>) -> Arc<Self> {
        let want = Want::new_monitor(identity, metadata, spec);
        Arc::new(Self {
            want,
            alerts: Mutex::new(Vec::new()),
            source_counts: Mutex::new(HashMap::new()),
            monitored_sources: Mutex::new(Vec::new()),
            actions,
            token: CancellationToken::new(),
        })
    }

    pub fn want(&self) -> &Arc<Want> {
        &self.want
    }

    /// Start the processor loop: wakes every 100ms (spec §4.J) and drains
    /// whatever arrived in the inbox since the last wake, evaluating each
    /// notification against the declared alert thresholds.
    pub fn spawn_processor(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.token.cancelled() => return,
                    _ = tokio::time::sleep(PROCESSOR_TICK) => {}
                }
                for note in this.want.drain_inbox().await {
                    this.evaluate(note).await;
                }
            }
        });
    }

    /// `StopNotificationProcessing`: stop the background loop. The Want
    /// itself is left alone (its own background agents are a separate
    /// concern, stopped via `Want::stop_all_agents`).
    pub async fn stop_processing(&self) {
        self.token.cancel();
    }

    async fn evaluate(&self, note: StateNotification) {
        let sources_snapshot = {
            let mut sources = self.monitored_sources.lock().await;
            if !sources.iter().any(|s| s == &note.source) {
                sources.push(note.source.clone());
            }
            sources.clone()
        };
        self.want
            .store_state(
                "monitored_sources",
                Dynamic::List(sources_snapshot.into_iter().map(Dynamic::String).collect()),
            )
            .await;

        let count = {
            let mut counts = self.source_counts.lock().await;
            let entry = counts.entry(note.source.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        self.want
            .store_state(format!("notifications_from_{}", note.source), Dynamic::Int(count as i64))
            .await;

        let Some(threshold) = self.threshold_for(&note.key).await else {
            return;
        };
        if !Self::exceeds_threshold(&note.value, &threshold) {
            return;
        }

        self.fire_alert(Alert {
            source: note.source,
            key: note.key,
            value: note.value,
            threshold,
            triggered_at: Utc::now(),
        })
        .await;
    }

    /// Alert thresholds are declared as spec params named
    /// `alert_threshold_<state_key>` (spec §4.J: "reads alert thresholds
    /// from spec params").
    async fn threshold_for(&self, key: &str) -> Option<Dynamic> {
        self.want.get_parameter(&format!("alert_threshold_{key}")).await
    }

    /// `>` strictly for numeric comparisons; non-numeric values fall back
    /// to string equality (spec §4.J).
    fn exceeds_threshold(value: &Dynamic, threshold: &Dynamic) -> bool {
        let (v, v_ok) = as_float(value);
        let (t, t_ok) = as_float(threshold);
        if v_ok && t_ok {
            v > t
        } else {
            value.to_string() == threshold.to_string()
        }
    }

    async fn fire_alert(&self, alert: Alert) {
        for action in &self.actions {
            match action {
                AlertAction::Log => {
                    tracing::warn!(
                        source = alert.source,
                        key = alert.key,
                        value = %alert.value,
                        threshold = %alert.threshold,
                        "alert threshold exceeded"
                    );
                }
                AlertAction::Store => {
                    self.want
                        .store_state("last_alert", Dynamic::String(format!("{}:{}", alert.source, alert.key)))
                        .await;
                    self.want
                        .store_state("last_alert_time", Dynamic::String(alert.triggered_at.to_rfc3339()))
                        .await;
                    let triggered = self.want.get_state_int("alerts_triggered", 0).await + 1;
                    self.want.store_state("alerts_triggered", Dynamic::Int(triggered)).await;
                }
            }
        }

        self.alerts.lock().await.push(alert);
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;
    use want_types::DynamicMap;

    fn identity(name: &str) -> WantIdentity {
        WantIdentity {
            id: format!("id-{name}"),
            name: name.to_string(),
            want_type: "monitor".to_string(),
        }
    }

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
    async fn numeric_threshold_alerts_strictly_greater() {
        let mut spec = WantSpec::default();
        spec.params.insert("alert_threshold_cpu".to_string(), Dynamic::Float(80.0));
        let monitor = MonitorWant::new(identity("m"), WantMetadata::default(), spec, vec![AlertAction::Store]);

        monitor.evaluate(note("source-a", "cpu", Dynamic::Float(80.0))).await;
        assert!(monitor.alerts().await.is_empty(), "equal to threshold must not alert");

        monitor.evaluate(note("source-a", "cpu", Dynamic::Float(81.0))).await;
        let alerts = monitor.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(monitor.want().get_state_int("alerts_triggered", 0).await, 1);
    }

    #[tokio::test]
    async fn non_numeric_threshold_falls_back_to_string_equality() {
        let mut spec = WantSpec::default();
        spec.params.insert(
            "alert_threshold_status".to_string(),
            Dynamic::String("critical".to_string()),
        );
        let monitor = MonitorWant::new(identity("m"), WantMetadata::default(), spec, vec![AlertAction::Store]);

        monitor.evaluate(note("source-a", "status", Dynamic::String("ok".into()))).await;
        assert!(monitor.alerts().await.is_empty());

        monitor
            .evaluate(note("source-a", "status", Dynamic::String("critical".into())))
            .await;
        assert_eq!(monitor.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn monitored_sources_are_deduplicated() {
        let spec = WantSpec::default();
        let monitor = MonitorWant::new(identity("m"), WantMetadata::default(), spec, vec![]);
        monitor.evaluate(note("a", "k", Dynamic::Int(1))).await;
        monitor.evaluate(note("a", "k", Dynamic::Int(2))).await;
        monitor.evaluate(note("b", "k", Dynamic::Int(3))).await;

        let state = monitor.want().get_state("monitored_sources").await.unwrap();
        let (list, ok) = want_types::as_array(&state);
        assert!(ok);
        assert_eq!(list.len(), 2);
        let _ = DynamicMap::new();
    }
}
