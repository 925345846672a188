use std::collections::HashMap;

use async_trait::async_trait;
use hop_core::{error::TransferError, models::Account, store::AccountStore};

/// Fixed set of accounts, typically loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
	accounts: HashMap<String, Account>,
}

impl StaticAccounts {
	pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
		StaticAccounts {
			accounts: accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
		}
	}
}

#[async_trait]
impl AccountStore for StaticAccounts {
	async fn resolve(&self, account_id: &str, user_id: &str) -> Result<Option<Account>, TransferError> {
		Ok(self
			.accounts
			.get(account_id)
			.filter(|a| a.user_id == user_id)
			.cloned())
	}
}
