//! Contract every storage backend implements.
//!
//! The engine only ever sees `Arc<dyn StorageProvider>`, built by a
//! [`ProviderFactory`] from an account's provider type and credentials.

use std::{fmt, pin::Pin, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
	io::AsyncRead,
	sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};

use crate::{
	error::{ProviderError, TransferError},
	models::Credentials,
};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthInfo {
	pub ok: bool,
	#[serde(default)]
	pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
	pub size: u64,
	pub content_type: String,
}

/// An open read of a remote file.
pub struct Download {
	pub info: FileInfo,
	pub stream: ByteStream,
}

impl fmt::Debug for Download {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Download").field("info", &self.info).finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteProgress {
	pub transferred: u64,
	pub total: u64,
}

/// Sending half of a provider's progress channel. Reporting never fails:
/// a dropped receiver just means nobody is listening.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
	tx: UnboundedSender<ByteProgress>,
}

impl ProgressReporter {
	pub fn channel() -> (Self, UnboundedReceiver<ByteProgress>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(ProgressReporter { tx }, rx)
	}

	pub fn report(&self, transferred: u64, total: u64) {
		let _ = self.tx.send(ByteProgress { transferred, total });
	}
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
	pub content_type: String,
	pub progress: ProgressReporter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
	/// Path or backend-specific object id of the written file.
	pub location: String,
	pub checksum: Option<String>,
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
	/// Provider type key this instance was built for.
	fn kind(&self) -> &str;

	async fn authenticate(&self) -> Result<AuthInfo, ProviderError>;

	async fn file_info(&self, path: &str) -> Result<FileInfo, ProviderError>;

	/// Open a read stream. Byte-level download progress is measured by the
	/// reader, so providers do not report it.
	async fn download(&self, path: &str) -> Result<Download, ProviderError>;

	async fn upload(
		&self,
		data: Vec<u8>,
		dest_path: &str,
		opts: UploadOptions,
	) -> Result<UploadReceipt, ProviderError>;
}

pub trait ProviderFactory: Send + Sync {
	/// Fails with [`TransferError::UnsupportedProvider`] for unknown types.
	fn create(&self, provider: &str, credentials: &Credentials) -> Result<Arc<dyn StorageProvider>, TransferError>;
}
