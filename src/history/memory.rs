//! In-process history store

use super::{merge_details, ExecutionRecord, HistoryStore};
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
pub struct MemoryHistoryStore {
    records: DashMap<String, ExecutionRecord>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    /// Records for one account, newest first
    pub fn list_for_user(&self, user_address: &str) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.user_address.eq_ignore_ascii_case(user_address))
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, record: &ExecutionRecord) -> EngineResult<()> {
        let mut record = record.clone();
        if let Some(existing) = self.records.get(&record.id) {
            record.created_at = existing.created_at;
            let mut details = existing.details.clone();
            merge_details(&mut details, record.details);
            record.details = details;
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: &str,
        error: Option<String>,
        fields: serde_json::Value,
    ) -> EngineResult<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| EngineError::ExecutionNotFound { id: id.to_string() })?;

        record.status = status.to_string();
        if error.is_some() {
            record.error = error;
        }
        merge_details(&mut record.details, fields);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn update_hash(&self, id: &str, tx_hash: &str, block_number: Option<u64>) -> EngineResult<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| EngineError::ExecutionNotFound { id: id.to_string() })?;

        record.tx_hash = Some(tx_hash.to_string());
        if block_number.is_some() {
            record.block_number = block_number;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn prune(&self, max_age: Duration) -> EngineResult<u64> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| EngineError::Internal(format!("Invalid max age: {}", e)))?;
        let cutoff = Utc::now() - max_age;

        let before = self.records.len();
        self.records.retain(|_, r| r.updated_at >= cutoff);
        let removed = before.saturating_sub(self.records.len()) as u64;

        if removed > 0 {
            debug!("Pruned {} history records older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ExecutionKind;
    use serde_json::json;

    fn record(id: &str) -> ExecutionRecord {
        ExecutionRecord {
            id: id.to_string(),
            kind: ExecutionKind::CrossChain,
            user_address: "0xAbC".to_string(),
            from_chain_id: 1,
            to_chain_id: 5000,
            from_token: "USDC".to_string(),
            to_token: "MNT".to_string(),
            from_amount: "100000000".to_string(),
            to_amount: "0".to_string(),
            tool: "stargateV2".to_string(),
            status: "INITIALIZING".to_string(),
            tx_hash: None,
            block_number: None,
            error: None,
            details: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn updates_apply_to_saved_records() {
        let store = MemoryHistoryStore::new();
        store.save(&record("a")).await.unwrap();

        store
            .update_status("a", "FAILED", Some("bridge timeout".into()), json!({"phase": "BRIDGE"}))
            .await
            .unwrap();
        store.update_hash("a", "0xfeed", Some(42)).await.unwrap();

        let saved = store.get("a").unwrap();
        assert_eq!(saved.status, "FAILED");
        assert_eq!(saved.error.as_deref(), Some("bridge timeout"));
        assert_eq!(saved.details["phase"], "BRIDGE");
        assert_eq!(saved.tx_hash.as_deref(), Some("0xfeed"));
        assert_eq!(saved.block_number, Some(42));
        assert_eq!(store.list_for_user("0xabc").len(), 1);

        assert!(store.update_hash("missing", "0x", None).await.is_err());
    }

    #[test]
    fn prune_drops_old_records() {
        let store = MemoryHistoryStore::new();
        let mut old = record("old");
        old.updated_at = Utc::now() - chrono::Duration::hours(25);

        let removed = tokio_test::block_on(async {
            store.save(&old).await.unwrap();
            store.save(&record("new")).await.unwrap();
            store.prune(Duration::from_secs(86_400)).await
        })
        .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("new").is_some());
        assert!(store.get("old").is_none());
    }
}
