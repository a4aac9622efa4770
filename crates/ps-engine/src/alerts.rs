//! Alert Engine - rule-based threshold monitoring over provider metrics
//!
//! Rules are evaluated per provider and per alert type on every metrics
//! update. Within one (provider, type) pair only the most severe breached
//! rule raises an alert, and all active alerts for the pair auto-resolve
//! once no rule of that type is breached anymore. Operators acknowledge or
//! resolve alerts by id; resolved alerts age out after a retention period.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use ps_common::{
    Alert, AlertRule, AlertSeverity, AlertStatus, AlertThresholds, AlertType, ComparisonOperator,
    ProviderMetrics, ProviderStatus,
};

const ALERT_TYPES: [AlertType; 4] = [
    AlertType::Uptime,
    AlertType::ResponseTime,
    AlertType::SuccessRate,
    AlertType::ProviderDown,
];

/// Build the default rule set from the configured threshold bands.
pub fn default_rules(thresholds: &AlertThresholds) -> Vec<AlertRule> {
    fn rule(
        id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        threshold: f64,
        operator: ComparisonOperator,
        title: &str,
        message_template: &str,
    ) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            alert_type,
            provider_id: None,
            severity,
            threshold,
            operator,
            enabled: true,
            title: title.to_string(),
            message_template: message_template.to_string(),
        }
    }

    vec![
        rule(
            "uptime_critical",
            AlertType::Uptime,
            AlertSeverity::Critical,
            thresholds.uptime.critical,
            ComparisonOperator::LessThan,
            "Critical Uptime Alert",
            "Provider {providerName} uptime has dropped to {value}% (below {threshold}%)",
        ),
        rule(
            "uptime_warning",
            AlertType::Uptime,
            AlertSeverity::Warning,
            thresholds.uptime.warning,
            ComparisonOperator::LessThan,
            "Uptime Warning",
            "Provider {providerName} uptime is {value}% (below {threshold}%)",
        ),
        rule(
            "response_time_critical",
            AlertType::ResponseTime,
            AlertSeverity::Critical,
            thresholds.response_time.critical,
            ComparisonOperator::GreaterThan,
            "Critical Response Time",
            "Provider {providerName} response time is {value}ms (above {threshold}ms)",
        ),
        rule(
            "response_time_warning",
            AlertType::ResponseTime,
            AlertSeverity::Warning,
            thresholds.response_time.warning,
            ComparisonOperator::GreaterThan,
            "High Response Time",
            "Provider {providerName} response time is {value}ms (above {threshold}ms)",
        ),
        rule(
            "success_rate_critical",
            AlertType::SuccessRate,
            AlertSeverity::Critical,
            thresholds.success_rate.critical,
            ComparisonOperator::LessThan,
            "Critical Success Rate",
            "Provider {providerName} success rate has dropped to {value}% (below {threshold}%)",
        ),
        rule(
            "provider_down",
            AlertType::ProviderDown,
            AlertSeverity::Emergency,
            0.0,
            ComparisonOperator::Equals,
            "Provider Down",
            "Provider {providerName} is currently down",
        ),
    ]
}

/// Observed metric value for a rule and whether the rule's condition holds.
fn observe(rule: &AlertRule, provider: &ProviderMetrics) -> (f64, bool) {
    match rule.alert_type {
        AlertType::Uptime => threshold_breached(rule, provider.uptime),
        AlertType::ResponseTime => threshold_breached(rule, provider.avg_response_time_ms),
        AlertType::SuccessRate => threshold_breached(rule, provider.success_rate),
        // Down is a status check; the recorded value is 1 while down
        AlertType::ProviderDown => {
            let down = provider.status == ProviderStatus::Down;
            (if down { 1.0 } else { 0.0 }, down)
        }
    }
}

fn threshold_breached(rule: &AlertRule, value: f64) -> (f64, bool) {
    let breached = match rule.operator {
        ComparisonOperator::LessThan => value < rule.threshold,
        ComparisonOperator::GreaterThan => value > rule.threshold,
        ComparisonOperator::Equals => value == rule.threshold,
    };
    (value, breached)
}

pub struct AlertEngine {
    rules: RwLock<Vec<AlertRule>>,
    thresholds: RwLock<AlertThresholds>,
    /// Newest first
    alerts: Mutex<VecDeque<Alert>>,
    tx: broadcast::Sender<Vec<Alert>>,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            rules: RwLock::new(default_rules(&thresholds)),
            thresholds: RwLock::new(thresholds),
            alerts: Mutex::new(VecDeque::new()),
            tx,
        }
    }

    /// Evaluate every enabled rule against the given metrics snapshot and
    /// return the alerts created by this pass.
    ///
    /// For each (provider, type) pair, breached rules compete and only the
    /// most severe one raises an alert (so a value crossing both the warning
    /// and critical thresholds at once yields a single critical alert). A
    /// pair with no breached rule left auto-resolves all of its active
    /// alerts, whatever severity originally raised them.
    pub fn evaluate(&self, providers: &[ProviderMetrics]) -> Vec<Alert> {
        let rules = self.rules.read().clone();
        let mut created = Vec::new();
        let mut changed = false;

        {
            let mut alerts = self.alerts.lock();
            for provider in providers {
                for alert_type in ALERT_TYPES {
                    let breached: Vec<(&AlertRule, f64)> = rules
                        .iter()
                        .filter(|rule| rule.enabled && rule.alert_type == alert_type)
                        .filter(|rule| {
                            rule.provider_id
                                .as_deref()
                                .map_or(true, |id| id == provider.id)
                        })
                        .filter_map(|rule| {
                            let (value, holds) = observe(rule, provider);
                            holds.then_some((rule, value))
                        })
                        .collect();

                    if breached.is_empty() {
                        for alert in alerts.iter_mut().filter(|alert| {
                            alert.alert_type == alert_type
                                && alert.provider_id.as_deref() == Some(provider.id.as_str())
                                && alert.is_active()
                        }) {
                            alert.status = AlertStatus::Resolved;
                            alert.resolved_at = Some(Utc::now());
                            changed = true;
                            info!(
                                provider_id = %provider.id,
                                alert_type = ?alert_type,
                                severity = ?alert.severity,
                                "Alert auto-resolved"
                            );
                        }
                        continue;
                    }

                    let Some((rule, value)) =
                        breached.iter().max_by_key(|(rule, _)| rule.severity)
                    else {
                        continue;
                    };
                    let duplicate = alerts.iter().any(|alert| {
                        alert.alert_type == alert_type
                            && alert.provider_id.as_deref() == Some(provider.id.as_str())
                            && alert.severity == rule.severity
                            && alert.is_active()
                    });
                    if duplicate {
                        continue;
                    }

                    let alert =
                        Alert::new(rule, provider.id.clone(), provider.name.clone(), *value);
                    info!(
                        provider_id = %provider.id,
                        alert_type = ?alert_type,
                        severity = ?alert.severity,
                        value = *value,
                        threshold = rule.threshold,
                        "Alert raised"
                    );
                    alerts.push_front(alert.clone());
                    created.push(alert);
                    changed = true;
                }
            }
        }

        if changed {
            self.publish();
        }
        created
    }

    /// Mark an active alert acknowledged. No-op on unknown ids and on
    /// alerts already past the active state.
    pub fn acknowledge(&self, alert_id: &str, acknowledged_by: &str) -> bool {
        let acknowledged = {
            let mut alerts = self.alerts.lock();
            match alerts
                .iter_mut()
                .find(|alert| alert.id == alert_id && alert.is_active())
            {
                Some(alert) => {
                    alert.status = AlertStatus::Acknowledged;
                    alert.acknowledged_at = Some(Utc::now());
                    alert.acknowledged_by = Some(acknowledged_by.to_string());
                    true
                }
                None => false,
            }
        };
        if acknowledged {
            info!(alert_id = %alert_id, acknowledged_by = %acknowledged_by, "Alert acknowledged");
            self.publish();
        }
        acknowledged
    }

    /// Resolve an alert by id, whatever its current state.
    pub fn resolve(&self, alert_id: &str) -> bool {
        let resolved = {
            let mut alerts = self.alerts.lock();
            match alerts.iter_mut().find(|alert| alert.id == alert_id) {
                Some(alert) => {
                    alert.status = AlertStatus::Resolved;
                    alert.resolved_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if resolved {
            info!(alert_id = %alert_id, "Alert resolved");
            self.publish();
        }
        resolved
    }

    /// All alerts, newest first, optionally truncated.
    pub fn alerts(&self, limit: Option<usize>) -> Vec<Alert> {
        let alerts = self.alerts.lock();
        match limit {
            Some(limit) => alerts.iter().take(limit).cloned().collect(),
            None => alerts.iter().cloned().collect(),
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.is_active())
            .cloned()
            .collect()
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|rule| rule.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                info!(rule_id = %rule_id, enabled, "Alert rule toggled");
                true
            }
            None => false,
        }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds.read().clone()
    }

    /// Swap in new threshold bands and rebuild the default rules around
    /// them. Enabled flags survive the rebuild.
    pub fn update_thresholds(&self, thresholds: AlertThresholds) {
        let mut rules = self.rules.write();
        let enabled: HashMap<String, bool> = rules
            .iter()
            .map(|rule| (rule.id.clone(), rule.enabled))
            .collect();
        let mut rebuilt = default_rules(&thresholds);
        for rule in &mut rebuilt {
            if let Some(&was_enabled) = enabled.get(&rule.id) {
                rule.enabled = was_enabled;
            }
        }
        *rules = rebuilt;
        *self.thresholds.write() = thresholds;
        info!("Alert thresholds updated");
    }

    /// Drop resolved and acknowledged alerts older than `max_age`. Active
    /// alerts are never purged.
    pub fn clear_old(&self, max_age: Duration) -> usize {
        let removed = {
            let mut alerts = self.alerts.lock();
            let before = alerts.len();
            alerts.retain(|alert| {
                alert.is_active()
                    || (Utc::now() - alert.created_at)
                        .to_std()
                        .map_or(true, |age| age <= max_age)
            });
            before - alerts.len()
        };
        if removed > 0 {
            debug!(removed, "Old alerts purged");
            self.publish();
        }
        removed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Alert>> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        let _ = self.tx.send(self.alerts(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AlertEngine {
        AlertEngine::new(AlertThresholds::default())
    }

    fn metrics(id: &str, name: &str, uptime: f64, avg_rt: f64, success_rate: f64) -> ProviderMetrics {
        ProviderMetrics {
            id: id.to_string(),
            name: name.to_string(),
            status: ProviderStatus::Operational,
            uptime,
            avg_response_time_ms: avg_rt,
            fee_per_transaction: 0.03,
            transactions_today: 0,
            success_rate,
            recent_transactions: Vec::new(),
        }
    }

    fn healthy(id: &str, name: &str) -> ProviderMetrics {
        metrics(id, name, 99.9, 120.0, 99.5)
    }

    #[test]
    fn test_default_rules_cover_every_type() {
        let rules = default_rules(&AlertThresholds::default());
        let ids: Vec<&str> = rules.iter().map(|rule| rule.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "uptime_critical",
                "uptime_warning",
                "response_time_critical",
                "response_time_warning",
                "success_rate_critical",
                "provider_down",
            ]
        );
        assert!(rules.iter().all(|rule| rule.enabled));
    }

    #[test]
    fn test_double_threshold_breach_raises_single_critical() {
        let engine = engine();
        // 94.0 crosses both the 98 warning and 95 critical bands at once
        let created = engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].severity, AlertSeverity::Critical);
        assert_eq!(created[0].alert_type, AlertType::Uptime);
        assert_eq!(
            created[0].message,
            "Provider Stripe uptime has dropped to 94% (below 95%)"
        );
        assert_eq!(engine.active_alerts().len(), 1);
    }

    #[test]
    fn test_repeated_breach_is_deduplicated() {
        let engine = engine();
        let snapshot = [metrics("stripe", "Stripe", 94.0, 120.0, 99.5)];
        assert_eq!(engine.evaluate(&snapshot).len(), 1);
        assert!(engine.evaluate(&snapshot).is_empty());
        assert!(engine.evaluate(&snapshot).is_empty());
        assert_eq!(engine.active_alerts().len(), 1);
    }

    #[test]
    fn test_recovery_auto_resolves() {
        let engine = engine();
        engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);
        assert_eq!(engine.active_alerts().len(), 1);

        let created = engine.evaluate(&[healthy("stripe", "Stripe")]);
        assert!(created.is_empty());
        assert!(engine.active_alerts().is_empty());

        let alerts = engine.alerts(None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Resolved);
        assert!(alerts[0].resolved_at.is_some());
    }

    #[test]
    fn test_provider_down_raises_emergency() {
        let engine = engine();
        let mut snapshot = healthy("square", "Square");
        snapshot.status = ProviderStatus::Down;

        let created = engine.evaluate(&[snapshot]);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].severity, AlertSeverity::Emergency);
        assert_eq!(created[0].message, "Provider Square is currently down");
        assert_eq!(created[0].value, 1.0);

        engine.evaluate(&[healthy("square", "Square")]);
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn test_de_escalation_keeps_critical_until_full_clear() {
        let engine = engine();
        engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);

        // Back into the warning band: a warning joins, the critical stays
        let created = engine.evaluate(&[metrics("stripe", "Stripe", 96.5, 120.0, 99.5)]);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].severity, AlertSeverity::Warning);
        assert_eq!(engine.active_alerts().len(), 2);

        engine.evaluate(&[healthy("stripe", "Stripe")]);
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn test_acknowledge_requires_active() {
        let engine = engine();
        let created = engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);
        let id = created[0].id.clone();

        assert!(engine.acknowledge(&id, "Ops On-Call"));
        let alert = &engine.alerts(None)[0];
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("Ops On-Call"));
        assert!(alert.acknowledged_at.is_some());

        // Already acknowledged and unknown ids are no-ops
        assert!(!engine.acknowledge(&id, "Ops On-Call"));
        assert!(!engine.acknowledge("missing", "Ops On-Call"));
    }

    #[test]
    fn test_resolve_by_id() {
        let engine = engine();
        let created = engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);
        let id = created[0].id.clone();

        assert!(engine.resolve(&id));
        assert_eq!(engine.alerts(None)[0].status, AlertStatus::Resolved);
        assert!(!engine.resolve("missing"));
    }

    #[test]
    fn test_disabled_rule_never_fires() {
        let engine = engine();
        assert!(engine.set_rule_enabled("provider_down", false));

        let mut snapshot = healthy("square", "Square");
        snapshot.status = ProviderStatus::Down;
        assert!(engine.evaluate(&[snapshot]).is_empty());

        assert!(!engine.set_rule_enabled("missing_rule", true));
    }

    #[test]
    fn test_update_thresholds_rebuilds_and_preserves_enabled() {
        let engine = engine();
        engine.set_rule_enabled("uptime_warning", false);

        let mut thresholds = AlertThresholds::default();
        thresholds.response_time.critical = 800.0;
        engine.update_thresholds(thresholds);

        let rules = engine.rules();
        let rt_critical = rules
            .iter()
            .find(|rule| rule.id == "response_time_critical")
            .unwrap();
        assert_eq!(rt_critical.threshold, 800.0);
        let uptime_warning = rules.iter().find(|rule| rule.id == "uptime_warning").unwrap();
        assert!(!uptime_warning.enabled);

        // 600ms trips the old critical threshold but not the new one
        let created = engine.evaluate(&[metrics("stripe", "Stripe", 99.9, 600.0, 99.5)]);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_clear_old_spares_active_alerts() {
        let engine = engine();
        engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);

        assert_eq!(engine.clear_old(Duration::ZERO), 0);
        assert_eq!(engine.alerts(None).len(), 1);

        engine.evaluate(&[healthy("stripe", "Stripe")]);
        assert_eq!(engine.clear_old(Duration::ZERO), 1);
        assert!(engine.alerts(None).is_empty());
    }

    #[test]
    fn test_alerts_are_newest_first() {
        let engine = engine();
        engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);
        engine.evaluate(&[
            metrics("stripe", "Stripe", 94.0, 120.0, 99.5),
            metrics("paypal", "PayPal", 99.9, 600.0, 99.5),
        ]);

        let alerts = engine.alerts(None);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].provider_id.as_deref(), Some("paypal"));
        assert_eq!(alerts[1].provider_id.as_deref(), Some("stripe"));

        assert_eq!(engine.alerts(Some(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_sees_alert_list() {
        let engine = engine();
        let mut rx = engine.subscribe();
        engine.evaluate(&[metrics("stripe", "Stripe", 94.0, 120.0, 99.5)]);

        let alerts = rx.recv().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }
}
