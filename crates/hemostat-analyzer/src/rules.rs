//! Rule-table classifier
//!
//! Deterministic and data-driven: an ordered list of rules, first match
//! wins. The table is a value, so production deployments can install richer
//! tables without touching this code.

use async_trait::async_trait;

use hemostat_common::config::RuleConfig;
use hemostat_common::{
    Action, AnalysisMethod, AnomalyKind, ContainerSample, Decision, HealthAlert, Result, Verdict,
};

use crate::classifier::Classify;

/// One classification rule, matched against a single anomaly
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: AnomalyKind,
    /// Inclusive lower bound on the anomaly's observed value
    pub min_actual: Option<f64>,
    /// Inclusive upper bound on the anomaly's observed value
    pub max_actual: Option<f64>,
    pub verdict: Verdict,
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
}

impl From<RuleConfig> for Rule {
    fn from(config: RuleConfig) -> Self {
        Self {
            kind: config.kind,
            min_actual: config.min_actual,
            max_actual: config.max_actual,
            verdict: config.verdict,
            action: config.action,
            confidence: config.confidence,
            reason: config.reason,
        }
    }
}

impl Rule {
    fn matches(&self, alert: &HealthAlert) -> bool {
        alert.issues.iter().any(|anomaly| {
            if anomaly.kind != self.kind {
                return false;
            }
            let actual = anomaly.actual.unwrap_or(0.0);
            self.min_actual.map_or(true, |min| actual >= min)
                && self.max_actual.map_or(true, |max| actual <= max)
        })
    }
}

/// Table-driven classifier; also the model fallback
pub struct RuleClassifier {
    rules: Vec<Rule>,
}

impl RuleClassifier {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Build from an externalized table, or the built-in one when none is
    /// configured
    pub fn from_config(rules: &[RuleConfig]) -> Self {
        if rules.is_empty() {
            Self::with_default_table()
        } else {
            Self::new(rules.iter().cloned().map(Rule::from).collect())
        }
    }

    /// The default table. Ordering matters: excessive restarts is evidence
    /// of prior remediation and must win over the gauge rules, otherwise the
    /// pipeline restarts a container it just restarted.
    pub fn with_default_table() -> Self {
        let rule = |kind,
                    min_actual: Option<f64>,
                    max_actual: Option<f64>,
                    verdict,
                    action,
                    confidence,
                    reason: &str| Rule {
            kind,
            min_actual,
            max_actual,
            verdict,
            action,
            confidence,
            reason: reason.to_string(),
        };
        Self::new(vec![
            rule(
                AnomalyKind::ExcessiveRestarts,
                None,
                None,
                Verdict::FalseAlarm,
                Action::None,
                0.4,
                "container was recently restarted repeatedly; refusing to restart again",
            ),
            rule(
                AnomalyKind::NonZeroExit,
                None,
                None,
                Verdict::RealIssue,
                Action::Restart,
                0.95,
                "container exited with a non-zero code",
            ),
            rule(
                AnomalyKind::HighCpu,
                Some(95.0),
                None,
                Verdict::RealIssue,
                Action::Restart,
                0.9,
                "cpu saturated above 95%",
            ),
            rule(
                AnomalyKind::HighCpu,
                Some(85.0),
                Some(95.0),
                Verdict::RealIssue,
                Action::Restart,
                0.75,
                "sustained cpu above threshold",
            ),
            rule(
                AnomalyKind::HighMemory,
                Some(90.0),
                None,
                Verdict::RealIssue,
                Action::Restart,
                0.9,
                "memory nearly exhausted",
            ),
            rule(
                AnomalyKind::UnhealthyStatus,
                None,
                None,
                Verdict::RealIssue,
                Action::Restart,
                0.8,
                "health probe reports unhealthy",
            ),
        ])
    }
}

#[async_trait]
impl Classify for RuleClassifier {
    async fn classify(
        &self,
        alert: &HealthAlert,
        _recent: Option<&ContainerSample>,
    ) -> Result<Decision> {
        for rule in &self.rules {
            if rule.matches(alert) {
                return Ok(Decision {
                    verdict: rule.verdict,
                    action: rule.action,
                    confidence: rule.confidence,
                    reason: rule.reason.to_string(),
                    analysis_method: AnalysisMethod::Rule,
                });
            }
        }
        // Nothing matched: the signal looks transient
        Ok(Decision::false_alarm(
            "no rule matched; treating the signal as transient",
            0.3,
            AnalysisMethod::Rule,
        ))
    }
}
