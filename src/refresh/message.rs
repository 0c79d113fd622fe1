//! Messages exchanged between the coordinator and worker agents.

use crate::data::models::PlayerId;
use crate::refresh::domain::{Domain, DomainSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token pairing a request with its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who asked for a refresh, which decides where its outcome is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "domain", rename_all = "snake_case")]
pub enum Origin {
    /// A periodic sweep of the given domain; the outcome goes to that
    /// scheduler's completion channel.
    Sweep(Domain),
    /// An interactive caller; the outcome goes back through the broker.
    OnDemand,
}

/// One unit of refresh work. Consumed exactly once by a worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub player_id: PlayerId,
    pub domains: DomainSet,
    pub correlation_id: CorrelationId,
    pub dispatched_at: DateTime<Utc>,
    pub reply_required: bool,
    pub origin: Origin,
}

/// What a worker agent reports for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Every requested domain was fetched and stored.
    Success,
    /// The listed domains failed; the rest were stored.
    PartialFailure { failed: DomainSet },
    /// The player does not exist in the store.
    RecordNotFound,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Success)
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Success => f.write_str("success"),
            RefreshOutcome::PartialFailure { failed } => write!(f, "partial failure ({failed})"),
            RefreshOutcome::RecordNotFound => f.write_str("record not found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Refresh(RefreshRequest),
    Outcome(RefreshOutcome),
}

/// Framing unit carried by a [`Transport`](crate::refresh::broker::Transport).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation_id: CorrelationId,
    pub kind: MessageKind,
    pub payload: Payload,
}

impl Envelope {
    pub fn request(request: RefreshRequest) -> Self {
        Self {
            correlation_id: request.correlation_id,
            kind: MessageKind::Request,
            payload: Payload::Refresh(request),
        }
    }

    pub fn response(correlation_id: CorrelationId, outcome: RefreshOutcome) -> Self {
        Self {
            correlation_id,
            kind: MessageKind::Response,
            payload: Payload::Outcome(outcome),
        }
    }
}

/// Out-of-band report from a worker to the scheduler that dispatched a sweep
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Id of the dispatch this reports on, so a scheduler can tell a late
    /// outcome from an earlier dispatch apart from the current one.
    pub correlation_id: CorrelationId,
    pub player_id: PlayerId,
    pub domain: Domain,
    pub outcome: RefreshOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_envelope_wire_shape() {
        let env = Envelope::response(
            CorrelationId(12),
            RefreshOutcome::PartialFailure {
                failed: DomainSet::MASTERY,
            },
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["correlation_id"], json!(12));
        assert_eq!(value["kind"], json!("response"));
        assert_eq!(value["payload"]["type"], json!("outcome"));
        assert_eq!(value["payload"]["status"], json!("partial_failure"));
    }

    #[test]
    fn outcome_display_names_failed_domains() {
        let outcome = RefreshOutcome::PartialFailure {
            failed: DomainSet::MASTERY | DomainSet::ACCOUNT,
        };
        assert_eq!(outcome.to_string(), "partial failure (mastery, account)");
        assert!(!outcome.is_success());
        assert!(RefreshOutcome::Success.is_success());
    }
}
