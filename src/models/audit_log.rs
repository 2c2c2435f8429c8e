use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Append-only record of a privileged state transition. Rows are never
/// updated or deleted.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Insert payload for the audit trail.
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub actor_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewAuditLog {
    pub fn new(entity_type: &str, entity_id: impl ToString, action: &str) -> Self {
        Self {
            actor_id: None,
            actor_email: None,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            before: None,
            after: None,
            reason: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn actor(mut self, id: Uuid, email: &str) -> Self {
        self.actor_id = Some(id);
        self.actor_email = Some(email.to_string());
        self
    }

    pub fn before(mut self, snapshot: serde_json::Value) -> Self {
        self.before = Some(snapshot);
        self
    }

    pub fn after(mut self, snapshot: serde_json::Value) -> Self {
        self.after = Some(snapshot);
        self
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(|r| r.to_string());
        self
    }
}
