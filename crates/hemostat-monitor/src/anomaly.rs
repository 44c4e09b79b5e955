//! Anomaly detection rules
//!
//! Gauge anomalies (CPU, memory) use a three-step severity graduation:
//! critical above 95 %, high above the configured threshold, medium above
//! 0.8× the threshold. Lifecycle anomalies carry fixed severities.

use hemostat_common::config::MonitorConfig;
use hemostat_common::{
    Anomaly, AnomalyKind, ContainerSample, ContainerStatus, HealthStatus, Severity,
};

const CRITICAL_GAUGE: f64 = 95.0;

fn gauge_anomaly(kind: AnomalyKind, value: f64, threshold: f64) -> Option<Anomaly> {
    let severity = if value > CRITICAL_GAUGE {
        Severity::Critical
    } else if value > threshold {
        Severity::High
    } else if value > 0.8 * threshold {
        Severity::Medium
    } else {
        return None;
    };
    Some(Anomaly {
        kind,
        severity,
        threshold: Some(threshold),
        actual: Some(value),
    })
}

/// Evaluate all anomaly rules against one sample
pub fn detect_anomalies(sample: &ContainerSample, config: &MonitorConfig) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if let Some(cpu) = sample.metrics.cpu_percent {
        if let Some(anomaly) = gauge_anomaly(AnomalyKind::HighCpu, cpu, config.cpu_threshold) {
            anomalies.push(anomaly);
        }
    }

    if let Some(anomaly) = gauge_anomaly(
        AnomalyKind::HighMemory,
        sample.metrics.memory_percent,
        config.memory_threshold,
    ) {
        anomalies.push(anomaly);
    }

    if sample.health_status == HealthStatus::Unhealthy {
        anomalies.push(Anomaly {
            kind: AnomalyKind::UnhealthyStatus,
            severity: Severity::High,
            threshold: None,
            actual: None,
        });
    }

    if sample.status == ContainerStatus::Exited {
        if let Some(code) = sample.exit_code.filter(|&code| code != 0) {
            anomalies.push(Anomaly {
                kind: AnomalyKind::NonZeroExit,
                severity: Severity::High,
                threshold: None,
                actual: Some(code as f64),
            });
        }
    }

    if sample.restart_count > config.restart_count_threshold {
        anomalies.push(Anomaly {
            kind: AnomalyKind::ExcessiveRestarts,
            severity: Severity::Medium,
            threshold: Some(config.restart_count_threshold as f64),
            actual: Some(sample.restart_count as f64),
        });
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hemostat_common::{ContainerRef, SampleMetrics};

    fn sample() -> ContainerSample {
        ContainerSample {
            container: ContainerRef::new("abc", "svc-a", "img"),
            status: ContainerStatus::Running,
            metrics: SampleMetrics::default(),
            health_status: HealthStatus::None,
            exit_code: None,
            restart_count: 0,
            sampled_at: Utc::now(),
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    fn kinds(anomalies: &[Anomaly]) -> Vec<AnomalyKind> {
        anomalies.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn cpu_severity_graduates() {
        let mut s = sample();

        s.metrics.cpu_percent = Some(96.0);
        assert_eq!(detect_anomalies(&s, &config())[0].severity, Severity::Critical);

        s.metrics.cpu_percent = Some(92.0);
        assert_eq!(detect_anomalies(&s, &config())[0].severity, Severity::High);

        s.metrics.cpu_percent = Some(70.0);
        assert_eq!(detect_anomalies(&s, &config())[0].severity, Severity::Medium);

        s.metrics.cpu_percent = Some(60.0);
        assert!(detect_anomalies(&s, &config()).is_empty());
    }

    #[test]
    fn missing_cpu_value_fires_no_cpu_anomaly() {
        let mut s = sample();
        s.metrics.cpu_percent = None;
        s.metrics.memory_percent = 99.0;
        assert_eq!(kinds(&detect_anomalies(&s, &config())), vec![AnomalyKind::HighMemory]);
    }

    #[test]
    fn memory_uses_same_graduation() {
        let mut s = sample();
        s.metrics.memory_percent = 85.0;
        let anomalies = detect_anomalies(&s, &config());
        assert_eq!(anomalies[0].kind, AnomalyKind::HighMemory);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].threshold, Some(80.0));
    }

    #[test]
    fn unhealthy_probe_is_high() {
        let mut s = sample();
        s.health_status = HealthStatus::Unhealthy;
        let anomalies = detect_anomalies(&s, &config());
        assert_eq!(anomalies[0].kind, AnomalyKind::UnhealthyStatus);
        assert_eq!(anomalies[0].severity, Severity::High);
    }

    #[test]
    fn clean_exit_is_not_an_anomaly() {
        let mut s = sample();
        s.status = ContainerStatus::Exited;
        s.exit_code = Some(0);
        assert!(detect_anomalies(&s, &config()).is_empty());

        s.exit_code = Some(137);
        assert_eq!(kinds(&detect_anomalies(&s, &config())), vec![AnomalyKind::NonZeroExit]);
    }

    #[test]
    fn restart_threshold_is_exclusive() {
        let mut s = sample();
        s.restart_count = 5;
        assert!(detect_anomalies(&s, &config()).is_empty());
        s.restart_count = 6;
        assert_eq!(
            kinds(&detect_anomalies(&s, &config())),
            vec![AnomalyKind::ExcessiveRestarts]
        );
    }

    #[test]
    fn multiple_anomalies_stack() {
        let mut s = sample();
        s.metrics.cpu_percent = Some(97.0);
        s.metrics.memory_percent = 90.0;
        s.health_status = HealthStatus::Unhealthy;
        let anomalies = detect_anomalies(&s, &config());
        assert_eq!(
            kinds(&anomalies),
            vec![
                AnomalyKind::HighCpu,
                AnomalyKind::HighMemory,
                AnomalyKind::UnhealthyStatus
            ]
        );
    }
}
