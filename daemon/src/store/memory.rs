use std::collections::HashMap;

use async_trait::async_trait;
use hop_core::{
	error::PersistenceError,
	models::{TransferRecord, TransferUpdate},
	store::PersistenceSink,
};
use parking_lot::Mutex;

/// Process-local transfer history.
///
/// Versioned updates older than the stored row are dropped, so a slow
/// writer cannot roll a record back.
#[derive(Default)]
pub struct MemorySink {
	records: Mutex<HashMap<String, TransferRecord>>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl PersistenceSink for MemorySink {
	async fn create_record(&self, record: &TransferRecord) -> Result<(), PersistenceError> {
		self.records.lock().insert(record.id.clone(), record.clone());
		Ok(())
	}

	async fn update_record(&self, id: &str, update: &TransferUpdate) -> Result<(), PersistenceError> {
		let mut records = self.records.lock();
		let record = records
			.get_mut(id)
			.ok_or_else(|| PersistenceError::Database(format!("transfer {id} not found")))?;
		if update.supersedes(record) {
			update.apply(record);
		}
		Ok(())
	}

	async fn find_record(&self, id: &str) -> Result<Option<TransferRecord>, PersistenceError> {
		Ok(self.records.lock().get(id).cloned())
	}

	async fn list_records(&self, user_id: &str) -> Result<Vec<TransferRecord>, PersistenceError> {
		let mut rows: Vec<TransferRecord> = self
			.records
			.lock()
			.values()
			.filter(|r| r.user_id == user_id)
			.cloned()
			.collect();
		rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
		Ok(rows)
	}
}
