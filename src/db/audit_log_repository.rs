use async_trait::async_trait;

use crate::models::audit_log::{AuditLog, NewAuditLog};

/// Append-only audit trail. Callers treat failures as non-fatal: log with
/// `warn!` and carry on, never fail the user-facing operation.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: NewAuditLog) -> Result<AuditLog, sqlx::Error>;

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLog>, sqlx::Error>;
}
