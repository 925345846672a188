use std::{future::Future, sync::Arc, time::Instant};

use hop_core::{
	error::{ProviderError, TransferError},
	provider::{Download, ProgressReporter, ProviderFactory, StorageProvider, UploadOptions, UploadReceipt},
	store::{AccountStore, PersistenceSink},
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{Phase, TransferJob};

/// Cap on the up-front buffer reservation; larger files grow the buffer as
/// they stream in.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Why a pipeline stopped before uploading.
#[derive(Debug)]
enum Halt {
	Cancelled,
	Failed(TransferError),
}

impl From<TransferError> for Halt {
	fn from(err: TransferError) -> Self {
		Halt::Failed(err)
	}
}

impl From<ProviderError> for Halt {
	fn from(err: ProviderError) -> Self {
		Halt::Failed(TransferError::Provider(err))
	}
}

/// Drives one job from queued to a terminal state: download from the
/// source account, then upload to the destination account.
#[derive(Clone)]
pub(crate) struct Pipeline {
	pub accounts: Arc<dyn AccountStore>,
	pub providers: Arc<dyn ProviderFactory>,
	pub sink: Arc<dyn PersistenceSink>,
	pub chunk_size: usize,
}

impl Pipeline {
	/// Never returns an error: failures end up on the job record.
	pub async fn run(&self, job: &TransferJob) {
		if let Err(err) = job.start() {
			debug!(job_id = %job.id(), %err, "job no longer startable");
			return;
		}
		info!(job_id = %job.id(), source = %job.source_path(), dest = %job.destination_path(), "transfer started");
		persist(self.sink.as_ref(), job).await;

		match self.execute(job).await {
			Ok(receipt) => match job.complete() {
				Ok(()) => {
					info!(job_id = %job.id(), location = %receipt.location, bytes = job.file_size(), "transfer completed");
					persist(self.sink.as_ref(), job).await;
				}
				Err(err) => debug!(job_id = %job.id(), %err, "completion discarded"),
			},
			Err(Halt::Cancelled) => {
				debug!(job_id = %job.id(), "pipeline stopped after cancellation");
			}
			Err(Halt::Failed(err)) => {
				let message = err.to_string();
				match job.fail(&message) {
					Ok(()) => {
						warn!(job_id = %job.id(), error = %message, "transfer failed");
						persist(self.sink.as_ref(), job).await;
					}
					Err(err) => debug!(job_id = %job.id(), %err, "failure discarded"),
				}
			}
		}
	}

	async fn execute(&self, job: &TransferJob) -> Result<UploadReceipt, Halt> {
		let token = job.cancellation();

		let source = guard(token, self.connect(job.source_account_id(), job.user_id())).await??;
		let dest = guard(token, self.connect(job.destination_account_id(), job.user_id())).await??;

		let Download { info, mut stream } = guard(token, source.download(job.source_path())).await??;
		job.establish_file_size(info.size);
		let total = job.file_size();

		let mut data = Vec::with_capacity(total.min(MAX_PREALLOC) as usize);
		let mut buf = vec![0u8; self.chunk_size];
		let started = Instant::now();
		loop {
			let n = guard(token, stream.read(&mut buf)).await?.map_err(ProviderError::from)?;
			if n == 0 {
				break;
			}
			data.extend_from_slice(&buf[..n]);
			let read = data.len() as u64;
			job.update_phase_progress(Phase::Download, read, total, speed(read, started));
		}
		drop(stream);
		job.establish_file_size(data.len() as u64);
		debug!(job_id = %job.id(), bytes = data.len(), "download finished");

		let content_type = if info.content_type.is_empty() {
			job.content_type().to_string()
		} else {
			info.content_type
		};
		let size = data.len() as u64;
		let (reporter, mut progress) = ProgressReporter::channel();
		let opts = UploadOptions { content_type, progress: reporter };

		let upload = dest.upload(data, job.destination_path(), opts);
		tokio::pin!(upload);
		let started = Instant::now();
		let receipt = loop {
			tokio::select! {
				biased;
				_ = token.cancelled() => return Err(Halt::Cancelled),
				res = &mut upload => break res?,
				Some(p) = progress.recv() => {
					let total = if p.total > 0 { p.total } else { size };
					job.update_phase_progress(Phase::Upload, p.transferred, total, speed(p.transferred, started));
				}
			}
		};
		while let Ok(p) = progress.try_recv() {
			let total = if p.total > 0 { p.total } else { size };
			job.update_phase_progress(Phase::Upload, p.transferred, total, speed(p.transferred, started));
		}

		Ok(receipt)
	}

	/// Resolve an account, build its provider and authenticate it.
	async fn connect(&self, account_id: &str, user_id: &str) -> Result<Arc<dyn StorageProvider>, Halt> {
		let account = self
			.accounts
			.resolve(account_id, user_id)
			.await?
			.ok_or_else(|| TransferError::NotFound(format!("account {account_id}")))?;

		let provider = self.providers.create(&account.provider, &account.credentials)?;
		let auth = provider.authenticate().await?;
		if !auth.ok {
			return Err(ProviderError::Auth(format!("authentication failed for account {account_id}")).into());
		}
		Ok(provider)
	}
}

/// Await `fut` unless the job is cancelled first.
async fn guard<F: Future>(token: &CancellationToken, fut: F) -> Result<F::Output, Halt> {
	tokio::select! {
		biased;
		_ = token.cancelled() => Err(Halt::Cancelled),
		out = fut => Ok(out),
	}
}

fn speed(bytes: u64, since: Instant) -> f64 {
	let secs = since.elapsed().as_secs_f64();
	if secs > 0.0 {
		bytes as f64 / secs
	} else {
		0.0
	}
}

/// Best-effort flush of the job's current state.
pub(crate) async fn persist(sink: &dyn PersistenceSink, job: &TransferJob) {
	if let Err(err) = sink.update_record(job.id(), &job.snapshot()).await {
		warn!(job_id = %job.id(), %err, "failed to persist transfer state");
	}
}
