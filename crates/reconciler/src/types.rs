//! Results of a deploy run and of a read-only describe.

use std::fmt;

use nimbus_core::ResourceKind;
use serde::{Serialize, Serializer};

use crate::entity::SyncOutcome;
use crate::error::Error;

/// One entity that synced successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// One entity whose sync failed. Its siblings still ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(serialize_with = "display")]
    pub error: Error,
}

fn display<S: Serializer>(value: &impl fmt::Display, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Result of a deploy run with partial success support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub service: String,
    pub stage: String,
    pub outcomes: Vec<EntityOutcome>,
    pub failures: Vec<EntityFailure>,
    /// No entity failed.
    pub converged: bool,
}

impl DeployReport {
    pub fn new(service: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            stage: stage.into(),
            outcomes: Vec::new(),
            failures: Vec::new(),
            converged: true,
        }
    }

    pub fn record_success(&mut self, kind: ResourceKind, name: &str, outcome: SyncOutcome) {
        self.outcomes.push(EntityOutcome {
            kind,
            name: name.to_string(),
            outcome,
        });
    }

    pub fn record_failure(&mut self, kind: ResourceKind, name: &str, error: Error) {
        self.converged = false;
        self.failures.push(EntityFailure {
            kind,
            name: name.to_string(),
            error,
        });
    }

    /// Outcome recorded for `name` of `kind`, if it synced.
    pub fn outcome(&self, kind: ResourceKind, name: &str) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| &o.outcome)
    }

    /// Error recorded for `name` of `kind`, if its sync failed.
    pub fn failure(&self, kind: ResourceKind, name: &str) -> Option<&Error> {
        self.failures
            .iter()
            .find(|f| f.kind == kind && f.name == name)
            .map(|f| &f.error)
    }

    /// Number of entities whose sync mutated the account.
    pub fn changed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_change()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Whether a declared resource exists in the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
    Deployed { id: String },
    NotDeployed,
}

/// Describe line for one declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(flatten)]
    pub state: ResourceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Read-only view of a service as it exists in the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub stage: String,
    pub resources: Vec<ResourceStatus>,
    /// Gateway domain, if the gateway exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ServiceInfo {
    pub fn status(&self, kind: ResourceKind, name: &str) -> Option<&ResourceStatus> {
        self.resources
            .iter()
            .find(|r| r.kind == kind && r.name == name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_clears_converged() {
        let mut report = DeployReport::new("shop", "dev");
        report.record_success(
            ResourceKind::Function,
            "api",
            SyncOutcome::Created {
                id: "fn1".to_string(),
            },
        );
        assert!(report.converged);

        report.record_failure(
            ResourceKind::Trigger,
            "api-cron",
            Error::invalid_config("boom"),
        );
        assert!(!report.converged);
        assert!(!report.all_succeeded());
        assert_eq!(report.changed_count(), 1);
        assert!(report.failure(ResourceKind::Trigger, "api-cron").is_some());
        assert!(report.outcome(ResourceKind::Trigger, "api-cron").is_none());
    }

    #[test]
    fn test_report_serializes_errors_as_text() {
        let mut report = DeployReport::new("shop", "dev");
        report.record_failure(
            ResourceKind::Function,
            "api",
            Error::invalid_environment("api", "bad key"),
        );

        let json = serde_json::to_value(&report).expect("serialize");
        let text = json["failures"][0]["error"].as_str().expect("string");
        assert!(text.contains("bad key"));
        assert_eq!(json["failures"][0]["kind"], "function");
    }
}
