//! Test doubles for the engine.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use hop_core::{
	error::{PersistenceError, ProviderError, TransferError},
	models::{Account, Credentials, JobStatus, TransferRecord, TransferRequest, TransferUpdate},
	provider::{AuthInfo, Download, FileInfo, ProviderFactory, StorageProvider, UploadOptions, UploadReceipt},
	store::PersistenceSink,
	EngineConfig,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::Dispatcher;
use crate::store::{MemorySink, StaticAccounts};

pub const USER: &str = "u1";

/// Shared state behind every `memory` provider built by one factory.
#[derive(Default)]
pub struct Backend {
	pub files: Mutex<HashMap<String, Vec<u8>>>,
	pub uploads: Mutex<HashMap<String, Vec<u8>>>,
	/// When set, each download waits for one permit.
	pub gate: Option<Arc<Semaphore>>,
	pub fail_info: bool,
	/// Download failures by source path.
	pub fail_download: HashMap<String, String>,
	pub fail_auth: bool,
	/// Download of this path panics inside the pipeline.
	pub panic_download: Option<String>,
	/// Bytes per upload progress report; 0 reports once at the end.
	pub upload_step: usize,
}

impl Backend {
	pub fn with_file(self, path: &str, data: Vec<u8>) -> Self {
		self.files.lock().insert(path.to_string(), data);
		self
	}

	pub fn uploaded(&self, path: &str) -> Option<Vec<u8>> {
		self.uploads.lock().get(path).cloned()
	}
}

pub struct MemoryProvider {
	backend: Arc<Backend>,
}

#[async_trait]
impl StorageProvider for MemoryProvider {
	fn kind(&self) -> &str {
		"memory"
	}

	async fn authenticate(&self) -> Result<AuthInfo, ProviderError> {
		Ok(AuthInfo { ok: !self.backend.fail_auth, meta: serde_json::Value::Null })
	}

	async fn file_info(&self, path: &str) -> Result<FileInfo, ProviderError> {
		if self.backend.fail_info {
			return Err(ProviderError::other("probe unavailable"));
		}
		let size = self
			.backend
			.files
			.lock()
			.get(path)
			.map(|d| d.len() as u64)
			.ok_or_else(|| ProviderError::NotFound(path.to_string()))?;
		Ok(FileInfo { size, content_type: "text/plain".into() })
	}

	async fn download(&self, path: &str) -> Result<Download, ProviderError> {
		if let Some(gate) = &self.backend.gate {
			gate.acquire().await.map_err(|e| ProviderError::other(e.to_string()))?.forget();
		}
		if self.backend.panic_download.as_deref() == Some(path) {
			panic!("download of {path} blew up");
		}
		if let Some(msg) = self.backend.fail_download.get(path) {
			return Err(ProviderError::other(msg.clone()));
		}
		let data = self
			.backend
			.files
			.lock()
			.get(path)
			.cloned()
			.ok_or_else(|| ProviderError::NotFound(path.to_string()))?;
		Ok(Download {
			info: FileInfo { size: data.len() as u64, content_type: "text/plain".into() },
			stream: Box::pin(std::io::Cursor::new(data)),
		})
	}

	async fn upload(&self, data: Vec<u8>, dest_path: &str, opts: UploadOptions) -> Result<UploadReceipt, ProviderError> {
		let total = data.len() as u64;
		let step = match self.backend.upload_step {
			0 => data.len().max(1),
			n => n,
		};
		let mut sent = 0usize;
		while sent < data.len() {
			sent = (sent + step).min(data.len());
			opts.progress.report(sent as u64, total);
			tokio::task::yield_now().await;
		}
		self.backend.uploads.lock().insert(dest_path.to_string(), data);
		Ok(UploadReceipt { location: dest_path.to_string(), checksum: None })
	}
}

pub struct MemoryFactory {
	pub backend: Arc<Backend>,
}

impl ProviderFactory for MemoryFactory {
	fn create(&self, provider: &str, _credentials: &Credentials) -> Result<Arc<dyn StorageProvider>, TransferError> {
		match provider {
			"memory" => Ok(Arc::new(MemoryProvider { backend: self.backend.clone() })),
			other => Err(TransferError::UnsupportedProvider(other.to_string())),
		}
	}
}

/// [`MemorySink`] with an outage switch and a slow path for `running` writes.
#[derive(Default)]
pub struct TestSink {
	pub(crate) inner: MemorySink,
	pub(crate) unavailable: AtomicBool,
	/// Delay applied to every update that writes `running`.
	pub running_delay: Option<Duration>,
}

impl TestSink {
	/// While set, every operation fails as if the backing store were down.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.unavailable.store(unavailable, Ordering::SeqCst);
	}

	fn check(&self) -> Result<(), PersistenceError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(PersistenceError::Database("store unavailable".into()));
		}
		Ok(())
	}
}

#[async_trait]
impl PersistenceSink for TestSink {
	async fn create_record(&self, record: &TransferRecord) -> Result<(), PersistenceError> {
		self.check()?;
		self.inner.create_record(record).await
	}

	async fn update_record(&self, id: &str, update: &TransferUpdate) -> Result<(), PersistenceError> {
		self.check()?;
		if let (Some(delay), Some(JobStatus::Running)) = (self.running_delay, update.status) {
			tokio::time::sleep(delay).await;
		}
		self.inner.update_record(id, update).await
	}

	async fn find_record(&self, id: &str) -> Result<Option<TransferRecord>, PersistenceError> {
		self.check()?;
		self.inner.find_record(id).await
	}

	async fn list_records(&self, user_id: &str) -> Result<Vec<TransferRecord>, PersistenceError> {
		self.check()?;
		self.inner.list_records(user_id).await
	}
}

pub struct Harness {
	pub dispatcher: Dispatcher,
	pub backend: Arc<Backend>,
	pub sink: Arc<TestSink>,
}

pub fn harness(max_concurrent: usize, backend: Backend) -> Harness {
	harness_with(max_concurrent, backend, TestSink::default())
}

pub fn harness_with(max_concurrent: usize, backend: Backend, sink: TestSink) -> Harness {
	let backend = Arc::new(backend);
	let sink = Arc::new(sink);
	let accounts = StaticAccounts::new([
		account("src", "memory"),
		account("dst", "memory"),
		account("ftp", "ftp"),
	]);
	let config = EngineConfig { chunk_size: 500, ..EngineConfig::default() }.with_max_concurrent(max_concurrent);
	let dispatcher = Dispatcher::new(
		config,
		Arc::new(accounts),
		Arc::new(MemoryFactory { backend: backend.clone() }),
		sink.clone(),
	)
	.unwrap();
	Harness { dispatcher, backend, sink }
}

fn account(id: &str, provider: &str) -> Account {
	Account {
		id: id.into(),
		user_id: USER.into(),
		provider: provider.into(),
		credentials: Credentials::default(),
	}
}

pub fn request(path: &str) -> TransferRequest {
	TransferRequest {
		user_id: USER.into(),
		source_account_id: "src".into(),
		destination_account_id: "dst".into(),
		source_path: path.into(),
		destination_path: format!("/copy{path}"),
		file_name: None,
	}
}

/// Poll until the transfer reaches `status`, or panic after a few seconds.
pub async fn wait_for_status(dispatcher: &Dispatcher, id: &str, status: JobStatus) {
	let result = tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if let Ok(stats) = dispatcher.get_transfer_status(id, USER).await {
				if stats.status == status {
					return;
				}
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await;
	assert!(result.is_ok(), "transfer {id} never reached {status}");
}

/// Poll until `cond` holds, or panic after a few seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
	let result = tokio::time::timeout(Duration::from_secs(5), async {
		while !cond() {
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await;
	assert!(result.is_ok(), "condition not reached");
}
