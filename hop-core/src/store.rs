use async_trait::async_trait;

use crate::{
	error::{PersistenceError, TransferError},
	models::{Account, TransferRecord, TransferUpdate},
};

/// Source of account credentials. Owned by the API layer.
#[async_trait]
pub trait AccountStore: Send + Sync {
	/// `Ok(None)` when the account does not exist or belongs to another user.
	async fn resolve(&self, account_id: &str, user_id: &str) -> Result<Option<Account>, TransferError>;
}

/// Durable history of transfer records.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
	async fn create_record(&self, record: &TransferRecord) -> Result<(), PersistenceError>;

	async fn update_record(&self, id: &str, update: &TransferUpdate) -> Result<(), PersistenceError>;

	async fn find_record(&self, id: &str) -> Result<Option<TransferRecord>, PersistenceError>;

	/// Newest first.
	async fn list_records(&self, user_id: &str) -> Result<Vec<TransferRecord>, PersistenceError>;
}
