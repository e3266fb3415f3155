//! Processor identifiers, health snapshots, and wire payloads

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The two external payment processors. `Default` is cheaper and always
/// tried first while healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Default,
    Fallback,
}

impl ProcessorKind {
    pub const ALL: [ProcessorKind; 2] = [ProcessorKind::Default, ProcessorKind::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Default => "default",
            ProcessorKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(ProcessorKind::Default),
            "fallback" => Ok(ProcessorKind::Fallback),
            other => Err(format!("unknown processor: {}", other)),
        }
    }
}

/// Health verdict for a single processor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProcessorStatus {
    pub failing: bool,
    pub min_response_time: u64,
}

impl ProcessorStatus {
    /// Verdict used when a probe errored or never ran
    pub fn unreachable() -> Self {
        Self {
            failing: true,
            min_response_time: 0,
        }
    }
}

/// Cluster-shared verdict for both processors.
///
/// Cold-start state is both-failing so a fresh replica queues work instead
/// of blindly calling processors nobody has probed yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub default: ProcessorStatus,
    pub fallback: ProcessorStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            default: ProcessorStatus::unreachable(),
            fallback: ProcessorStatus::unreachable(),
            last_checked_at: None,
        }
    }
}

impl HealthSnapshot {
    pub fn status(&self, kind: ProcessorKind) -> ProcessorStatus {
        match kind {
            ProcessorKind::Default => self.default,
            ProcessorKind::Fallback => self.fallback,
        }
    }

    /// Delivery order under the two-tier preference policy: the default
    /// processor first whenever it is not failing, then the fallback.
    pub fn try_order(&self) -> Vec<ProcessorKind> {
        ProcessorKind::ALL
            .into_iter()
            .filter(|kind| !self.status(*kind).failing)
            .collect()
    }
}

/// Body POSTed to `/payments` on a processor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorPaymentRequest {
    pub correlation_id: Uuid,
    pub amount: f64,
    pub requested_at: String,
}

impl ProcessorPaymentRequest {
    pub fn new(correlation_id: Uuid, amount: f64, requested_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            amount,
            requested_at: requested_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Body returned by `/payments/service-health` on a processor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthResponse {
    pub failing: bool,
    pub min_response_time: u64,
}

impl From<ServiceHealthResponse> for ProcessorStatus {
    fn from(raw: ServiceHealthResponse) -> Self {
        Self {
            failing: raw.failing,
            min_response_time: raw.min_response_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_kind_round_trips_through_strings() {
        assert_eq!("default".parse::<ProcessorKind>(), Ok(ProcessorKind::Default));
        assert_eq!(
            "Fallback".parse::<ProcessorKind>(),
            Ok(ProcessorKind::Fallback)
        );
        assert!("primary".parse::<ProcessorKind>().is_err());
        assert_eq!(ProcessorKind::Default.to_string(), "default");
    }

    #[test]
    fn cold_start_snapshot_marks_both_failing() {
        let snapshot = HealthSnapshot::default();
        assert!(snapshot.default.failing);
        assert!(snapshot.fallback.failing);
        assert!(snapshot.try_order().is_empty());
    }

    #[test]
    fn try_order_prefers_default() {
        let healthy = ProcessorStatus {
            failing: false,
            min_response_time: 12,
        };
        let snapshot = HealthSnapshot {
            default: healthy,
            fallback: healthy,
            last_checked_at: None,
        };

        assert_eq!(
            snapshot.try_order(),
            vec![ProcessorKind::Default, ProcessorKind::Fallback]
        );
    }

    #[test]
    fn try_order_skips_failing_default() {
        let snapshot = HealthSnapshot {
            default: ProcessorStatus::unreachable(),
            fallback: ProcessorStatus {
                failing: false,
                min_response_time: 80,
            },
            last_checked_at: None,
        };

        assert_eq!(snapshot.try_order(), vec![ProcessorKind::Fallback]);
    }

    #[test]
    fn payment_request_serializes_camel_case() {
        let id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let requested_at = "2025-07-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let body = ProcessorPaymentRequest::new(id, 19.9, requested_at);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["correlationId"],
            "11111111-1111-1111-1111-111111111111"
        );
        assert_eq!(json["amount"], 19.9);
        assert_eq!(json["requestedAt"], "2025-07-01T12:00:00.000Z");
    }

    #[test]
    fn service_health_parses_processor_payload() {
        let raw: ServiceHealthResponse =
            serde_json::from_str(r#"{"failing":false,"minResponseTime":37}"#).unwrap();
        let status = ProcessorStatus::from(raw);

        assert!(!status.failing);
        assert_eq!(status.min_response_time, 37);
    }
}
