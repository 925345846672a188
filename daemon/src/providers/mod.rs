mod local;

use std::{collections::HashMap, sync::Arc};

use hop_core::{
	error::{ProviderError, TransferError},
	models::Credentials,
	provider::{ProviderFactory, StorageProvider},
};

pub use local::{content_type_for, LocalProvider};

type Constructor = Box<dyn Fn(&Credentials) -> Result<Arc<dyn StorageProvider>, ProviderError> + Send + Sync>;

/// [`ProviderFactory`] keyed by provider type.
pub struct ProviderRegistry {
	constructors: HashMap<String, Constructor>,
}

impl ProviderRegistry {
	/// Everything this crate ships: currently only `local`.
	pub fn with_defaults() -> Self {
		let mut registry = ProviderRegistry { constructors: HashMap::new() };
		registry.register(local::KIND, |creds| {
			Ok(Arc::new(LocalProvider::from_credentials(creds)?) as Arc<dyn StorageProvider>)
		});
		registry
	}

	pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
	where
		F: Fn(&Credentials) -> Result<Arc<dyn StorageProvider>, ProviderError> + Send + Sync + 'static,
	{
		self.constructors.insert(kind.into(), Box::new(constructor));
	}

	pub fn kinds(&self) -> Vec<&str> {
		let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
		kinds.sort_unstable();
		kinds
	}
}

impl Default for ProviderRegistry {
	fn default() -> Self {
		Self::with_defaults()
	}
}

impl ProviderFactory for ProviderRegistry {
	fn create(&self, provider: &str, credentials: &Credentials) -> Result<Arc<dyn StorageProvider>, TransferError> {
		let constructor = self
			.constructors
			.get(provider)
			.ok_or_else(|| TransferError::UnsupportedProvider(provider.to_string()))?;
		Ok(constructor(credentials)?)
	}
}
