//! Webhook notification delivery
//!
//! Formats semantic payloads (title, severity tag, structured fields) and
//! POSTs them to the configured sink. Non-2xx responses are retried with
//! backoff up to the attempt budget; an explicit Retry-After is honored.
//! After the last attempt the notification is dropped with a warning.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hemostat_common::config::AlertConfig;
use hemostat_common::{
    Action, ActionResult, Error, FalseAlarm, RemediationOutcome, Result,
};

/// Color/severity tag attached to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTag {
    Success,
    Error,
    Warning,
    Info,
    Muted,
}

impl NotificationTag {
    /// Mapping from outcome result to tag
    pub fn for_result(result: ActionResult) -> Self {
        match result {
            ActionResult::Success => NotificationTag::Success,
            ActionResult::Failed => NotificationTag::Error,
            ActionResult::Rejected => NotificationTag::Warning,
            ActionResult::NotApplicable => NotificationTag::Muted,
        }
    }

    /// Accent color most sinks render next to the message
    pub fn color(&self) -> &'static str {
        match self {
            NotificationTag::Success => "#2eb67d",
            NotificationTag::Error => "#e01e5a",
            NotificationTag::Warning => "#ecb22e",
            NotificationTag::Info => "#36c5f0",
            NotificationTag::Muted => "#9aa0a6",
        }
    }
}

/// Semantic notification payload, independent of the sink's transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub tag: NotificationTag,
    pub container: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Notification {
    pub fn for_outcome(outcome: &RemediationOutcome) -> Self {
        let title = match outcome.result {
            ActionResult::Success => format!(
                "Remediation succeeded: {} on {}",
                outcome.action.as_str(),
                outcome.container.name
            ),
            ActionResult::Failed => format!(
                "Remediation failed: {} on {}",
                outcome.action.as_str(),
                outcome.container.name
            ),
            ActionResult::Rejected => format!(
                "Remediation rejected for {}: {}",
                outcome.container.name,
                outcome
                    .rejection_reason
                    .map(|r| format!("{r:?}"))
                    .unwrap_or_else(|| "unspecified".to_string())
            ),
            ActionResult::NotApplicable => format!(
                "Remediation not applicable: {} on {}",
                outcome.action.as_str(),
                outcome.container.name
            ),
        };
        Self {
            title,
            tag: NotificationTag::for_result(outcome.result),
            container: outcome.container.name.clone(),
            action: Some(outcome.action),
            reason: outcome.reason.clone(),
            confidence: outcome.confidence,
            dry_run: outcome.dry_run,
            error: outcome.error.clone(),
        }
    }

    pub fn for_false_alarm(alarm: &FalseAlarm) -> Self {
        Self {
            title: format!("False alarm: {}", alarm.container.name),
            tag: NotificationTag::Info,
            container: alarm.container.name.clone(),
            action: None,
            reason: Some(alarm.reason.clone()),
            confidence: Some(alarm.confidence),
            dry_run: false,
            error: None,
        }
    }
}

/// What actually goes over the wire: the notification plus the tag's color
#[derive(Serialize)]
struct WirePayload<'a> {
    color: &'static str,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Webhook sink client
pub struct WebhookNotifier {
    client: Client,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl WebhookNotifier {
    pub fn new(config: &AlertConfig, url: String) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(config.webhook_timeout_ms))
            .user_agent(concat!("hemostat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Notification(format!("failed to create webhook client: {e}")))?;
        Ok(Self {
            client,
            url,
            attempts: config.webhook_attempts.max(1),
            backoff: Duration::from_millis(config.webhook_backoff_ms),
        })
    }

    /// Deliver one notification, retrying with backoff. Returns an error
    /// only after the attempt budget is spent; callers log and move on.
    pub async fn deliver(&self, notification: &Notification) -> Result<()> {
        let payload = WirePayload {
            color: notification.tag.color(),
            notification,
        };
        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            match self.client.post(&self.url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(title = %notification.title, attempt, "notification delivered");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let retry_after = retry_after(&response);
                    last_error = format!("webhook returned {status}");
                    if attempt < self.attempts {
                        let delay = retry_after.unwrap_or(self.backoff * attempt);
                        debug!(
                            %status,
                            attempt,
                            ?delay,
                            "webhook delivery failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    last_error = format!("webhook request failed: {e}");
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }
        warn!(
            title = %notification.title,
            attempts = self.attempts,
            "notification dropped: {}",
            last_error
        );
        Err(Error::Notification(last_error))
    }
}

/// Parse an explicit Retry-After (seconds form) from a rate-limit response
fn retry_after(response: &Response) -> Option<Duration> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS
        && response.status() != StatusCode::SERVICE_UNAVAILABLE
    {
        return None;
    }
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemostat_common::{AnalysisMethod, ContainerRef, RejectionReason};
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn outcome(result: ActionResult) -> RemediationOutcome {
        RemediationOutcome {
            container: ContainerRef::new("abc", "svc-a", "img"),
            action: Action::Restart,
            result,
            rejection_reason: (result == ActionResult::Rejected)
                .then_some(RejectionReason::CooldownActive),
            dry_run: false,
            reason: Some("sustained cpu".to_string()),
            confidence: Some(0.75),
            error: None,
            duration_ms: 4_000,
            attempt: 1,
        }
    }

    fn notifier_for(server: &MockServer, config: &AlertConfig) -> WebhookNotifier {
        WebhookNotifier::new(config, format!("{}/hook", server.uri())).unwrap()
    }

    fn fast_config() -> AlertConfig {
        AlertConfig {
            webhook_backoff_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn tag_mapping_follows_the_table() {
        assert_eq!(
            NotificationTag::for_result(ActionResult::Success),
            NotificationTag::Success
        );
        assert_eq!(
            NotificationTag::for_result(ActionResult::Failed),
            NotificationTag::Error
        );
        assert_eq!(
            NotificationTag::for_result(ActionResult::Rejected),
            NotificationTag::Warning
        );
        assert_eq!(
            NotificationTag::for_result(ActionResult::NotApplicable),
            NotificationTag::Muted
        );
        let alarm = FalseAlarm {
            container: ContainerRef::new("abc", "svc-b", "img"),
            reason: "transient".to_string(),
            confidence: 0.4,
            analysis_method: AnalysisMethod::Rule,
        };
        assert_eq!(Notification::for_false_alarm(&alarm).tag, NotificationTag::Info);
    }

    #[tokio::test]
    async fn delivery_posts_semantic_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "tag": "success",
                "color": "#2eb67d",
                "container": "svc-a",
                "action": "restart"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server, &fast_config());
        notifier
            .deliver(&Notification::for_outcome(&outcome(ActionResult::Success)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_2xx_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server, &fast_config());
        notifier
            .deliver(&Notification::for_outcome(&outcome(ActionResult::Success)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attempts_are_bounded_then_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server, &fast_config());
        let err = notifier
            .deliver(&Notification::for_outcome(&outcome(ActionResult::Failed)))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "notification");
    }

    #[tokio::test]
    async fn rate_limit_retry_after_is_honored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "1"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&server, &fast_config());
        let started = std::time::Instant::now();
        notifier
            .deliver(&Notification::for_outcome(&outcome(ActionResult::Success)))
            .await
            .unwrap();
        // The second attempt waited out the advertised Retry-After
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
