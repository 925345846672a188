use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use hop_core::{
	error::ProviderError,
	models::Credentials,
	provider::{AuthInfo, Download, FileInfo, StorageProvider, UploadOptions, UploadReceipt, DEFAULT_CONTENT_TYPE},
};
use serde_json::json;
use tokio::{fs, io::AsyncWriteExt};

pub const KIND: &str = "local";

const CHUNK_SIZE: usize = 256 * 1024; // 256KB

/// A directory on this machine exposed as a storage account.
///
/// Credentials: `root` (required), the directory every path is resolved
/// against. Paths may not climb out of it.
#[derive(Debug, Clone)]
pub struct LocalProvider {
	root: PathBuf,
}

impl LocalProvider {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		LocalProvider { root: root.into() }
	}

	pub fn from_credentials(credentials: &Credentials) -> Result<Self, ProviderError> {
		let root = credentials
			.get("root")
			.filter(|r| !r.is_empty())
			.ok_or_else(|| ProviderError::Auth("local account has no root directory".into()))?;
		Ok(LocalProvider::new(root))
	}

	fn resolve(&self, path: &str) -> Result<PathBuf, ProviderError> {
		let mut full = self.root.clone();
		for component in Path::new(path).components() {
			match component {
				Component::Normal(part) => full.push(part),
				Component::RootDir | Component::CurDir => {}
				Component::ParentDir | Component::Prefix(_) => {
					return Err(ProviderError::NotFound(format!("{path}: outside of account root")));
				}
			}
		}
		Ok(full)
	}
}

#[async_trait]
impl StorageProvider for LocalProvider {
	fn kind(&self) -> &str {
		KIND
	}

	async fn authenticate(&self) -> Result<AuthInfo, ProviderError> {
		let ok = fs::metadata(&self.root).await.map(|m| m.is_dir()).unwrap_or(false);
		Ok(AuthInfo {
			ok,
			meta: json!({ "root": self.root.display().to_string() }),
		})
	}

	async fn file_info(&self, path: &str) -> Result<FileInfo, ProviderError> {
		let full = self.resolve(path)?;
		let metadata = fs::metadata(&full).await.map_err(|e| map_io_error(e, path))?;
		if !metadata.is_file() {
			return Err(ProviderError::NotFound(format!("{path}: not a file")));
		}
		Ok(FileInfo {
			size: metadata.len(),
			content_type: content_type_for(path).to_string(),
		})
	}

	async fn download(&self, path: &str) -> Result<Download, ProviderError> {
		let info = self.file_info(path).await?;
		let file = fs::File::open(self.resolve(path)?)
			.await
			.map_err(|e| map_io_error(e, path))?;
		Ok(Download { info, stream: Box::pin(file) })
	}

	async fn upload(&self, data: Vec<u8>, dest_path: &str, opts: UploadOptions) -> Result<UploadReceipt, ProviderError> {
		let full = self.resolve(dest_path)?;
		if let Some(parent) = full.parent() {
			fs::create_dir_all(parent).await.map_err(|e| map_io_error(e, dest_path))?;
		}

		let mut dest = fs::File::create(&full).await.map_err(|e| map_io_error(e, dest_path))?;
		let mut hasher = blake3::Hasher::new();
		let total = data.len() as u64;
		let mut written = 0u64;

		for chunk in data.chunks(CHUNK_SIZE) {
			hasher.update(chunk);
			dest.write_all(chunk).await.map_err(|e| map_io_error(e, dest_path))?;
			written += chunk.len() as u64;
			opts.progress.report(written, total);
		}
		dest.flush().await.map_err(|e| map_io_error(e, dest_path))?;
		if total == 0 {
			opts.progress.report(0, 0);
		}

		Ok(UploadReceipt {
			location: full.display().to_string(),
			checksum: Some(hasher.finalize().to_hex().to_string()),
		})
	}
}

fn map_io_error(err: std::io::Error, path: &str) -> ProviderError {
	match err.kind() {
		std::io::ErrorKind::NotFound => ProviderError::NotFound(format!("{path}: not found")),
		std::io::ErrorKind::PermissionDenied => ProviderError::Auth(format!("{path}: permission denied")),
		_ => ProviderError::Io(format!("{path}: {err}")),
	}
}

/// Guess a MIME type from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
	let ext = Path::new(path)
		.extension()
		.and_then(|e| e.to_str())
		.map(str::to_ascii_lowercase);
	match ext.as_deref() {
		Some("txt") | Some("log") => "text/plain",
		Some("csv") => "text/csv",
		Some("html") | Some("htm") => "text/html",
		Some("json") => "application/json",
		Some("pdf") => "application/pdf",
		Some("zip") => "application/zip",
		Some("gz") => "application/gzip",
		Some("png") => "image/png",
		Some("jpg") | Some("jpeg") => "image/jpeg",
		Some("gif") => "image/gif",
		Some("webp") => "image/webp",
		Some("mp3") => "audio/mpeg",
		Some("mp4") => "video/mp4",
		_ => DEFAULT_CONTENT_TYPE,
	}
}

#[cfg(test)]
mod tests {
	use std::fs as std_fs;

	use hop_core::provider::ProgressReporter;
	use tokio::io::AsyncReadExt;

	use super::*;

	#[tokio::test]
	async fn authenticates_existing_root() {
		let tmp = tempfile::tempdir().unwrap();
		assert!(LocalProvider::new(tmp.path()).authenticate().await.unwrap().ok);
		assert!(!LocalProvider::new(tmp.path().join("missing")).authenticate().await.unwrap().ok);
	}

	#[tokio::test]
	async fn file_info_reports_size_and_type() {
		let tmp = tempfile::tempdir().unwrap();
		std_fs::write(tmp.path().join("notes.txt"), "hello world").unwrap();

		let info = LocalProvider::new(tmp.path()).file_info("/notes.txt").await.unwrap();
		assert_eq!(info.size, 11);
		assert_eq!(info.content_type, "text/plain");
	}

	#[tokio::test]
	async fn missing_file_is_not_found() {
		let tmp = tempfile::tempdir().unwrap();
		let err = LocalProvider::new(tmp.path()).file_info("nope.bin").await.unwrap_err();
		assert!(matches!(err, ProviderError::NotFound(_)));
	}

	#[tokio::test]
	async fn directories_are_not_files() {
		let tmp = tempfile::tempdir().unwrap();
		std_fs::create_dir(tmp.path().join("sub")).unwrap();
		let err = LocalProvider::new(tmp.path()).file_info("sub").await.unwrap_err();
		assert!(matches!(err, ProviderError::NotFound(_)));
	}

	#[tokio::test]
	async fn paths_cannot_escape_root() {
		let tmp = tempfile::tempdir().unwrap();
		let provider = LocalProvider::new(tmp.path().join("root"));
		let err = provider.file_info("../secret.txt").await.unwrap_err();
		assert!(matches!(err, ProviderError::NotFound(_)));
	}

	#[tokio::test]
	async fn download_streams_contents() {
		let tmp = tempfile::tempdir().unwrap();
		std_fs::write(tmp.path().join("a.bin"), vec![7u8; 1000]).unwrap();

		let mut download = LocalProvider::new(tmp.path()).download("a.bin").await.unwrap();
		assert_eq!(download.info.size, 1000);

		let mut buf = Vec::new();
		download.stream.read_to_end(&mut buf).await.unwrap();
		assert_eq!(buf, vec![7u8; 1000]);
	}

	#[tokio::test]
	async fn upload_writes_nested_file_and_reports_progress() {
		let tmp = tempfile::tempdir().unwrap();
		let data = vec![42u8; CHUNK_SIZE * 2 + 10];
		let (reporter, mut rx) = ProgressReporter::channel();
		let opts = UploadOptions { content_type: "application/octet-stream".into(), progress: reporter };

		let receipt = LocalProvider::new(tmp.path())
			.upload(data.clone(), "/deep/dir/out.bin", opts)
			.await
			.unwrap();

		let written = std_fs::read(tmp.path().join("deep/dir/out.bin")).unwrap();
		assert_eq!(written, data);
		assert_eq!(receipt.checksum, Some(blake3::hash(&data).to_hex().to_string()));

		let mut reports = Vec::new();
		while let Ok(p) = rx.try_recv() {
			reports.push(p.transferred);
		}
		assert_eq!(reports, vec![CHUNK_SIZE as u64, CHUNK_SIZE as u64 * 2, data.len() as u64]);
	}

	#[test]
	fn credentials_need_root() {
		assert!(LocalProvider::from_credentials(&Credentials::default()).is_err());
		assert!(LocalProvider::from_credentials(&Credentials::default().with("root", "/srv")).is_ok());
	}

	#[test]
	fn content_types() {
		assert_eq!(content_type_for("a/B.JPG"), "image/jpeg");
		assert_eq!(content_type_for("x.json"), "application/json");
		assert_eq!(content_type_for("noext"), DEFAULT_CONTENT_TYPE);
	}
}
