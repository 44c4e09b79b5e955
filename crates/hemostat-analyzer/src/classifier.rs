//! Classification capability

use async_trait::async_trait;

use hemostat_common::{ContainerSample, Decision, HealthAlert, Result};

/// Decision capability the Analyzer is polymorphic over.
///
/// `recent` is the cached latest sample for the alerted container, when one
/// exists; classifiers may use it as context.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(
        &self,
        alert: &HealthAlert,
        recent: Option<&ContainerSample>,
    ) -> Result<Decision>;
}
