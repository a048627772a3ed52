use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Snapshot of the latest backend operation for an instance.
///
/// Field values are copied verbatim from the backend; `status` keeps the
/// backend's own vocabulary and `error` its raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudOperation {
    pub name: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub insert_time: String,
    #[serde(default)]
    pub operation_type: String,
    #[serde(default)]
    pub start_time: String,
    pub status: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_instance_id: String,
}

impl CloudOperation {
    pub const PENDING: &'static str = "PENDING";

    pub fn pending(name: impl Into<String>, operation_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            name: name.into(),
            error: String::new(),
            insert_time: now.clone(),
            operation_type: operation_type.into(),
            start_time: now,
            status: Self::PENDING.to_string(),
            target_id: target_id.into(),
            target_link: String::new(),
            service_id: String::new(),
            service_instance_id: String::new(),
        }
    }
}

/// Normalized lifecycle state of the pending work on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationState {
    None,
    Pending,
    Done,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Done | OperationState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_payload_shape() {
        let json = r#"{"name":"op-123","error":"","insertTime":"2024-01-01T00:00:00Z","operationType":"CREATE","startTime":"2024-01-01T00:00:01Z","status":"PENDING","targetId":"db-1"}"#;
        let op: CloudOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op.name, "op-123");
        assert_eq!(op.operation_type, "CREATE");
        assert_eq!(op.status, "PENDING");
        assert_eq!(op.target_id, "db-1");

        let back = serde_json::to_value(&op).unwrap();
        assert_eq!(back["insertTime"], "2024-01-01T00:00:00Z");
        assert!(back.get("targetLink").is_none());
    }

    #[test]
    fn test_pending_snapshot() {
        let op = CloudOperation::pending("op-1", "CREATE", "db-1");
        assert_eq!(op.status, CloudOperation::PENDING);
        assert!(op.error.is_empty());
        assert_eq!(op.insert_time, op.start_time);
        assert!(!OperationState::Pending.is_terminal());
        assert!(OperationState::Failed.is_terminal());
    }
}
