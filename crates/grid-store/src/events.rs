use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::AuditEvent;

/// Append-only log of [`AuditEvent`]s, queryable by the Front API's
/// `/api/v1/cluster/events` read-only endpoint.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError>;
    /// Most recent `limit` events, chronological order.
    async fn list(&self, limit: u32) -> Result<Vec<AuditEvent>, StoreError>;
}

/// In-memory [`EventLog`]. Lost on process exit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list(&self, limit: u32) -> Result<Vec<AuditEvent>, StoreError> {
        let guard = self.events.read().await;
        let start = guard.len().saturating_sub(limit as usize);
        Ok(guard[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use grid_domain::JobId;
    use uuid::Uuid;

    #[tokio::test]
    async fn append_and_list_respects_limit() {
        let log = InMemoryEventLog::new();
        for i in 0..5 {
            log.append(AuditEvent::JobQueued {
                id: Uuid::new_v4(),
                at: Utc::now(),
                job_id: JobId::new(format!("job-{i}")),
            })
            .await
            .unwrap();
        }
        let recent = log.list(2).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}
