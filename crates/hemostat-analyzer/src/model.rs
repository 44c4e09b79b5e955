//! Model-endpoint classifier
//!
//! Consults an external language-model endpoint over HTTP/JSON. Any
//! malformed field, transport error, or blown deadline surfaces as a model
//! error so the Analyzer can fall back to the rule table. The per-alert
//! deadline is enforced here; this classifier never blocks the channel
//! longer than that.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use hemostat_common::config::ModelEndpointConfig;
use hemostat_common::{
    Action, AnalysisMethod, ContainerSample, Decision, Error, HealthAlert, Result, Verdict,
};

use crate::classifier::Classify;

/// Classifier backed by a remote model endpoint
pub struct ModelClassifier {
    client: Client,
    config: ModelEndpointConfig,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    container: &'a str,
    image: &'a str,
    prompt: String,
    issues: &'a [hemostat_common::Anomaly],
    #[serde(skip_serializing_if = "Option::is_none")]
    recent_sample: Option<&'a ContainerSample>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    verdict: Verdict,
    action: Action,
    confidence: f64,
    reason: String,
}

impl ModelClassifier {
    pub fn new(config: ModelEndpointConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(config.deadline_ms))
            .user_agent(concat!("hemostat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Model(format!("failed to create model client: {e}")))?;
        Ok(Self { client, config })
    }

    fn build_prompt(alert: &HealthAlert, recent: Option<&ContainerSample>) -> String {
        let mut prompt = format!(
            "Container {} ({}) is {:?} with {} anomalies: ",
            alert.container.name,
            alert.container.image,
            alert.status,
            alert.issues.len()
        );
        for issue in &alert.issues {
            prompt.push_str(&format!(
                "{:?} severity={:?} actual={:?}; ",
                issue.kind, issue.severity, issue.actual
            ));
        }
        if let Some(sample) = recent {
            prompt.push_str(&format!(
                "Previous sample at {}: cpu={:?}% mem={:.1}%.",
                sample.sampled_at, sample.metrics.cpu_percent, sample.metrics.memory_percent
            ));
        }
        prompt.push_str(
            " Decide whether this warrants remediation. \
             Reply with verdict, action, confidence and reason.",
        );
        prompt
    }
}

#[async_trait]
impl Classify for ModelClassifier {
    async fn classify(
        &self,
        alert: &HealthAlert,
        recent: Option<&ContainerSample>,
    ) -> Result<Decision> {
        let request = ClassifyRequest {
            container: &alert.container.name,
            image: &alert.container.image,
            prompt: Self::build_prompt(alert, recent),
            issues: &alert.issues,
            recent_sample: recent,
        };

        let mut builder = self.client.post(&self.config.url).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {api_key}"));
        }

        let deadline = Duration::from_millis(self.config.deadline_ms);
        let response = tokio::time::timeout(deadline, builder.send())
            .await
            .map_err(|_| Error::Timeout("model call exceeded deadline".to_string()))?
            .map_err(|e| Error::Model(format!("model request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Model(format!(
                "model endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("malformed model response: {e}")))?;

        if !(0.0..=1.0).contains(&parsed.confidence) {
            return Err(Error::Model(format!(
                "model confidence out of range: {}",
                parsed.confidence
            )));
        }

        debug!(
            container = %alert.container.name,
            verdict = ?parsed.verdict,
            confidence = parsed.confidence,
            "model classification"
        );

        Ok(Decision {
            verdict: parsed.verdict,
            // A false alarm never carries an action
            action: if parsed.verdict == Verdict::FalseAlarm {
                Action::None
            } else {
                parsed.action
            },
            confidence: parsed.confidence,
            reason: parsed.reason,
            analysis_method: AnalysisMethod::Model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemostat_common::{
        Anomaly, AnomalyKind, ContainerRef, ContainerStatus, HealthStatus, SampleMetrics, Severity,
    };
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> HealthAlert {
        HealthAlert {
            container: ContainerRef::new("abc", "svc-a", "nginx:1.25"),
            issues: vec![Anomaly {
                kind: AnomalyKind::HighCpu,
                severity: Severity::High,
                threshold: Some(85.0),
                actual: Some(92.0),
            }],
            metrics: SampleMetrics::default(),
            status: ContainerStatus::Running,
            restart_count: 0,
            exit_code: None,
            health_status: HealthStatus::None,
        }
    }

    fn config_for(server: &MockServer, deadline_ms: u64) -> ModelEndpointConfig {
        ModelEndpointConfig {
            url: format!("{}/v1/classify", server.uri()),
            api_key: Some("secret".to_string()),
            deadline_ms,
        }
    }

    #[tokio::test]
    async fn well_formed_response_becomes_a_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/classify"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({"container": "svc-a"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verdict": "real_issue",
                "action": "restart",
                "confidence": 0.82,
                "reason": "sustained load"
            })))
            .mount(&server)
            .await;

        let classifier = ModelClassifier::new(config_for(&server, 2_000)).unwrap();
        let decision = classifier.classify(&alert(), None).await.unwrap();
        assert_eq!(decision.verdict, Verdict::RealIssue);
        assert_eq!(decision.action, Action::Restart);
        assert_eq!(decision.confidence, 0.82);
        assert_eq!(decision.analysis_method, AnalysisMethod::Model);
    }

    #[tokio::test]
    async fn false_alarm_verdict_clears_the_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verdict": "false_alarm",
                "action": "restart",
                "confidence": 0.6,
                "reason": "looks transient"
            })))
            .mount(&server)
            .await;

        let classifier = ModelClassifier::new(config_for(&server, 2_000)).unwrap();
        let decision = classifier.classify(&alert(), None).await.unwrap();
        assert_eq!(decision.verdict, Verdict::FalseAlarm);
        assert_eq!(decision.action, Action::None);
    }

    #[tokio::test]
    async fn malformed_fields_are_a_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verdict": "maybe",
                "action": "restart",
                "confidence": 0.5,
                "reason": "?"
            })))
            .mount(&server)
            .await;

        let classifier = ModelClassifier::new(config_for(&server, 2_000)).unwrap();
        let err = classifier.classify(&alert(), None).await.unwrap_err();
        assert_eq!(err.category(), "model");
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verdict": "real_issue",
                "action": "restart",
                "confidence": 1.7,
                "reason": "overconfident"
            })))
            .mount(&server)
            .await;

        let classifier = ModelClassifier::new(config_for(&server, 2_000)).unwrap();
        let err = classifier.classify(&alert(), None).await.unwrap_err();
        assert_eq!(err.category(), "model");
    }

    #[tokio::test]
    async fn deadline_overrun_surfaces_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(serde_json::json!({
                        "verdict": "real_issue",
                        "action": "restart",
                        "confidence": 0.9,
                        "reason": "late"
                    })),
            )
            .mount(&server)
            .await;

        let classifier = ModelClassifier::new(config_for(&server, 100)).unwrap();
        let err = classifier.classify(&alert(), None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_) | Error::Model(_)));
    }

    #[tokio::test]
    async fn server_error_status_is_a_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let classifier = ModelClassifier::new(config_for(&server, 2_000)).unwrap();
        let err = classifier.classify(&alert(), None).await.unwrap_err();
        assert_eq!(err.category(), "model");
    }
}
