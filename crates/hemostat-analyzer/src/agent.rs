//! Analyzer agent
//!
//! Handles alerts in channel order. The primary classifier runs first; on
//! any failure the fallback (when configured) decides instead. A decision
//! only becomes a remediation request when it is a real issue, meets the
//! confidence threshold, and names an action — everything else is reported
//! as a false alarm, with the real-but-uncertain case preserved in the
//! reason so operators can tell the two apart.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use hemostat_broker::{get_json, AgentContext, MessageHandler};
use hemostat_common::config::AnalyzerConfig;
use hemostat_common::{
    keys, Action, ContainerSample, Decision, Envelope, FalseAlarm, HealthAlert, MessageKind,
    RemediationRequest, Result, Verdict,
};

use crate::classifier::Classify;
use crate::model::ModelClassifier;
use crate::rules::RuleClassifier;

pub const AGENT_NAME: &str = "analyzer";

/// Alert classification agent
pub struct AnalyzerAgent {
    ctx: AgentContext,
    config: AnalyzerConfig,
    primary: Arc<dyn Classify>,
    fallback: Option<Arc<dyn Classify>>,
}

impl AnalyzerAgent {
    /// Assemble the classifier pair from configuration
    pub fn from_config(ctx: AgentContext, config: AnalyzerConfig) -> Result<Self> {
        let rules = Arc::new(RuleClassifier::from_config(&config.rules));
        let (primary, fallback): (Arc<dyn Classify>, Option<Arc<dyn Classify>>) =
            if config.model_enabled {
                let model = Arc::new(ModelClassifier::new(config.model.clone())?);
                let fallback = config
                    .model_fallback_enabled
                    .then_some(rules as Arc<dyn Classify>);
                (model, fallback)
            } else {
                (rules, None)
            };
        Ok(Self {
            ctx,
            config,
            primary,
            fallback,
        })
    }

    pub fn new(
        ctx: AgentContext,
        config: AnalyzerConfig,
        primary: Arc<dyn Classify>,
        fallback: Option<Arc<dyn Classify>>,
    ) -> Self {
        Self {
            ctx,
            config,
            primary,
            fallback,
        }
    }

    async fn decide(
        &self,
        alert: &HealthAlert,
        recent: Option<&ContainerSample>,
    ) -> Option<Decision> {
        match self.primary.classify(alert, recent).await {
            Ok(decision) => Some(decision),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        container = %alert.container.name,
                        "primary classifier failed, falling back: {}",
                        e
                    );
                    match fallback.classify(alert, recent).await {
                        Ok(decision) => Some(decision),
                        Err(e) => {
                            warn!(
                                container = %alert.container.name,
                                "fallback classifier failed, dropping alert: {}",
                                e
                            );
                            None
                        }
                    }
                }
                None => {
                    warn!(
                        container = %alert.container.name,
                        "classifier failed and fallback is disabled, dropping alert: {}",
                        e
                    );
                    None
                }
            },
        }
    }

    async fn publish_decision(&self, alert: &HealthAlert, decision: Decision) -> Result<()> {
        let actionable = decision.verdict == Verdict::RealIssue
            && decision.confidence >= self.config.confidence_threshold
            && decision.action != Action::None;

        if actionable {
            info!(
                container = %alert.container.name,
                action = decision.action.as_str(),
                confidence = decision.confidence,
                "remediation needed"
            );
            let request = RemediationRequest {
                container: alert.container.clone(),
                action: decision.action,
                reason: decision.reason,
                confidence: decision.confidence,
                metrics: alert.metrics.clone(),
            };
            return self.ctx.publish(MessageKind::RemediationNeeded, &request).await;
        }

        // Preserve that a real-but-uncertain signal was real, so the UI can
        // distinguish it from a plain false alarm
        let reason = if decision.verdict == Verdict::RealIssue {
            format!(
                "real issue below confidence gate ({:.2} < {:.2}): {}",
                decision.confidence, self.config.confidence_threshold, decision.reason
            )
        } else {
            decision.reason
        };
        debug!(container = %alert.container.name, "false alarm: {}", reason);
        let false_alarm = FalseAlarm {
            container: alert.container.clone(),
            reason,
            confidence: decision.confidence,
            analysis_method: decision.analysis_method,
        };
        self.ctx.publish(MessageKind::FalseAlarm, &false_alarm).await
    }
}

#[async_trait]
impl MessageHandler for AnalyzerAgent {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let alert: HealthAlert = envelope.decode()?;
        let recent: Option<ContainerSample> =
            match get_json(self.ctx.broker(), &keys::stats(&alert.container.id)).await {
                Ok(sample) => sample,
                Err(e) => {
                    debug!(
                        container = %alert.container.name,
                        "no recent sample available: {}",
                        e
                    );
                    None
                }
            };

        let Some(decision) = self.decide(&alert, recent.as_ref()).await else {
            return Ok(());
        };
        self.publish_decision(&alert, decision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemostat_broker::{Broker, MemoryBroker};
    use hemostat_common::envelope::channels;
    use hemostat_common::{
        AnalysisMethod, Anomaly, AnomalyKind, ContainerRef, ContainerStatus, Error, HealthStatus,
        SampleMetrics, Severity,
    };

    struct FixedClassifier(Option<Decision>);

    #[async_trait]
    impl Classify for FixedClassifier {
        async fn classify(
            &self,
            _alert: &HealthAlert,
            _recent: Option<&ContainerSample>,
        ) -> Result<Decision> {
            self.0
                .clone()
                .ok_or_else(|| Error::Model("endpoint down".to_string()))
        }
    }

    fn alert(kind: AnomalyKind, actual: f64) -> HealthAlert {
        HealthAlert {
            container: ContainerRef::new("abc", "svc-a", "img"),
            issues: vec![Anomaly {
                kind,
                severity: Severity::High,
                threshold: Some(85.0),
                actual: Some(actual),
            }],
            metrics: SampleMetrics::default(),
            status: ContainerStatus::Running,
            restart_count: 0,
            exit_code: None,
            health_status: HealthStatus::None,
        }
    }

    fn envelope_for(alert: &HealthAlert) -> Envelope {
        Envelope::new("monitor", MessageKind::HealthAlert, alert).unwrap()
    }

    async fn requests_on(broker: &MemoryBroker) -> Vec<RemediationRequest> {
        broker
            .published_on(channels::REMEDIATION_NEEDED)
            .await
            .iter()
            .map(|raw| Envelope::from_json(raw).unwrap().decode().unwrap())
            .collect()
    }

    async fn false_alarms_on(broker: &MemoryBroker) -> Vec<FalseAlarm> {
        broker
            .published_on(channels::FALSE_ALARM)
            .await
            .iter()
            .map(|raw| Envelope::from_json(raw).unwrap().decode().unwrap())
            .collect()
    }

    fn agent_with(
        broker: Arc<MemoryBroker>,
        primary: Arc<dyn Classify>,
        fallback: Option<Arc<dyn Classify>>,
    ) -> AnalyzerAgent {
        AnalyzerAgent::new(
            AgentContext::new(AGENT_NAME, broker as Arc<dyn Broker>),
            AnalyzerConfig::default(),
            primary,
            fallback,
        )
    }

    #[tokio::test]
    async fn confident_real_issue_requests_remediation() {
        let broker = Arc::new(MemoryBroker::new());
        let agent = agent_with(
            broker.clone(),
            Arc::new(RuleClassifier::with_default_table()),
            None,
        );

        let alert = alert(AnomalyKind::HighCpu, 92.0);
        agent.handle(envelope_for(&alert)).await.unwrap();

        let requests = requests_on(&broker).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action, Action::Restart);
        assert_eq!(requests[0].confidence, 0.75);
        assert!(false_alarms_on(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn below_gate_real_issue_reports_uncertainty() {
        let broker = Arc::new(MemoryBroker::new());
        let primary = Arc::new(FixedClassifier(Some(Decision {
            verdict: Verdict::RealIssue,
            action: Action::Restart,
            confidence: 0.5,
            reason: "weak signal".to_string(),
            analysis_method: AnalysisMethod::Model,
        })));
        let agent = agent_with(broker.clone(), primary, None);

        agent
            .handle(envelope_for(&alert(AnomalyKind::HighCpu, 92.0)))
            .await
            .unwrap();

        assert!(requests_on(&broker).await.is_empty());
        let alarms = false_alarms_on(&broker).await;
        assert_eq!(alarms.len(), 1);
        assert!(alarms[0].reason.contains("below confidence gate"));
        assert!(alarms[0].reason.contains("weak signal"));
        assert_eq!(alarms[0].confidence, 0.5);
    }

    #[tokio::test]
    async fn actionless_real_issue_does_not_actuate() {
        let broker = Arc::new(MemoryBroker::new());
        let primary = Arc::new(FixedClassifier(Some(Decision {
            verdict: Verdict::RealIssue,
            action: Action::None,
            confidence: 0.95,
            reason: "real but nothing to do".to_string(),
            analysis_method: AnalysisMethod::Model,
        })));
        let agent = agent_with(broker.clone(), primary, None);

        agent
            .handle(envelope_for(&alert(AnomalyKind::HighCpu, 97.0)))
            .await
            .unwrap();

        assert!(requests_on(&broker).await.is_empty());
        assert_eq!(false_alarms_on(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_rules() {
        let broker = Arc::new(MemoryBroker::new());
        let agent = agent_with(
            broker.clone(),
            Arc::new(FixedClassifier(None)),
            Some(Arc::new(RuleClassifier::with_default_table())),
        );

        agent
            .handle(envelope_for(&alert(AnomalyKind::NonZeroExit, 137.0)))
            .await
            .unwrap();

        let requests = requests_on(&broker).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].confidence, 0.95);
    }

    #[tokio::test]
    async fn failure_without_fallback_drops_the_alert() {
        let broker = Arc::new(MemoryBroker::new());
        let agent = agent_with(broker.clone(), Arc::new(FixedClassifier(None)), None);

        agent
            .handle(envelope_for(&alert(AnomalyKind::NonZeroExit, 137.0)))
            .await
            .unwrap();

        assert!(requests_on(&broker).await.is_empty());
        assert!(false_alarms_on(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn false_alarm_passes_method_through() {
        let broker = Arc::new(MemoryBroker::new());
        let agent = agent_with(
            broker.clone(),
            Arc::new(RuleClassifier::with_default_table()),
            None,
        );

        agent
            .handle(envelope_for(&alert(AnomalyKind::ExcessiveRestarts, 8.0)))
            .await
            .unwrap();

        let alarms = false_alarms_on(&broker).await;
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].analysis_method, AnalysisMethod::Rule);
        assert_eq!(alarms[0].confidence, 0.4);
    }
}
