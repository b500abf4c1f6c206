use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded for an audited action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
        }
    }
}

/// Append-only record of a security-relevant action
///
/// Entries are never mutated; ids and timestamps are strictly monotonic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,

    /// Empty when the principal was unauthenticated; denials are recorded
    /// regardless
    pub user_id: String,

    pub action: String,
    pub resource: String,
    pub resource_type: String,
    pub result: AuditResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_omitted() {
        let entry = AuditEntry {
            id: 1,
            timestamp: Utc::now(),
            user_id: "admin-1".to_string(),
            action: "agent:create".to_string(),
            resource: "agent-1".to_string(),
            resource_type: "agent".to_string(),
            result: AuditResult::Success,
            details: None,
            error: None,
            ip: None,
            token: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["result"], "success");
        assert_eq!(json["userId"], "admin-1");
    }
}
