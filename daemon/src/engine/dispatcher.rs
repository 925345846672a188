use std::{
	collections::{HashMap, VecDeque},
	sync::Arc,
};

use chrono::Utc;
use hop_core::{
	config::EngineConfig,
	error::TransferError,
	models::{
		Account, JobStatus, ProgressEvent, QueueStatus, TransferRequest, TransferStats, TransferTicket, TransferUpdate,
	},
	provider::{FileInfo, ProviderFactory, DEFAULT_CONTENT_TYPE},
	store::{AccountStore, PersistenceSink},
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::{
	job::TransferJob,
	pipeline::{persist, Pipeline},
};

const ABORTED: &str = "transfer aborted unexpectedly";

#[derive(Default)]
struct Slots {
	pending: VecDeque<Arc<TransferJob>>,
	active: HashMap<String, Arc<TransferJob>>,
}

impl Slots {
	fn find(&self, id: &str) -> Option<&Arc<TransferJob>> {
		self.active.get(id).or_else(|| self.pending.iter().find(|j| j.id() == id))
	}

	/// Drop this exact job from the queue or the active set.
	fn remove(&mut self, job: &Arc<TransferJob>) {
		if self.active.get(job.id()).is_some_and(|j| Arc::ptr_eq(j, job)) {
			self.active.remove(job.id());
		} else if let Some(pos) = self.pending.iter().position(|j| Arc::ptr_eq(j, job)) {
			self.pending.remove(pos);
		}
	}
}

struct Inner {
	config: EngineConfig,
	accounts: Arc<dyn AccountStore>,
	providers: Arc<dyn ProviderFactory>,
	sink: Arc<dyn PersistenceSink>,
	events: broadcast::Sender<ProgressEvent>,
	slots: Mutex<Slots>,
}

/// Owns the FIFO pending queue and the bounded active set.
///
/// All queue state lives behind one mutex and every sweep runs start to
/// finish while holding it, so concurrent triggers collapse into
/// sequential sweeps and never race over the same queue.
#[derive(Clone)]
pub struct Dispatcher {
	inner: Arc<Inner>,
}

impl Dispatcher {
	pub fn new(
		config: EngineConfig,
		accounts: Arc<dyn AccountStore>,
		providers: Arc<dyn ProviderFactory>,
		sink: Arc<dyn PersistenceSink>,
	) -> Result<Self, TransferError> {
		config.validate()?;
		let (events, _) = broadcast::channel(config.event_capacity);
		Ok(Dispatcher {
			inner: Arc::new(Inner {
				config,
				accounts,
				providers,
				sink,
				events,
				slots: Mutex::new(Slots::default()),
			}),
		})
	}

	/// Validate, probe, persist as queued and enqueue.
	///
	/// The returned status is always `queued`, even when a free slot lets the
	/// job start before this returns.
	pub async fn create_transfer(&self, request: TransferRequest) -> Result<TransferTicket, TransferError> {
		validate(&request)?;

		let source = self.resolve(&request.source_account_id, &request.user_id, "source").await?;
		self.resolve(&request.destination_account_id, &request.user_id, "destination")
			.await?;

		let info = self.probe(&source, &request.source_path).await;

		let id = Ulid::new().to_string();
		let job = Arc::new(TransferJob::new(
			id.clone(),
			&request,
			info.size,
			info.content_type,
			self.inner.events.clone(),
		));

		if let Err(err) = self.inner.sink.create_record(&job.record()).await {
			warn!(job_id = %id, %err, "failed to persist new transfer");
		}

		self.inner.slots.lock().pending.push_back(job);
		info!(job_id = %id, user_id = %request.user_id, file_size = info.size, "transfer queued");
		self.drain();

		Ok(TransferTicket { transfer_id: id, status: JobStatus::Queued })
	}

	/// Move jobs from the head of the queue into free slots and start them.
	pub fn drain(&self) {
		let mut slots = self.inner.slots.lock();
		let mut started = 0usize;
		while slots.active.len() < self.inner.config.max_concurrent {
			let Some(job) = slots.pending.pop_front() else {
				break;
			};
			slots.active.insert(job.id().to_string(), job.clone());
			self.spawn_pipeline(job);
			started += 1;
		}
		debug!(started, active = slots.active.len(), queued = slots.pending.len(), "drain sweep");
	}

	pub async fn get_transfer_status(&self, id: &str, user_id: &str) -> Result<TransferStats, TransferError> {
		let live = self.inner.slots.lock().find(id).cloned();
		if let Some(job) = live {
			if job.user_id() != user_id {
				return Err(not_found(id));
			}
			return Ok(job.stats());
		}

		match self.inner.sink.find_record(id).await? {
			Some(record) if record.user_id == user_id => Ok(TransferStats::from_record(&record, Utc::now())),
			_ => Err(not_found(id)),
		}
	}

	/// Cancel a queued or running transfer.
	///
	/// A resident job is flipped to cancelled, persisted, then evicted; its
	/// pipeline notices through the job's cancellation token at its next
	/// await. Anything else is cancelled directly in the store.
	pub async fn cancel_transfer(&self, id: &str, user_id: &str) -> Result<(), TransferError> {
		let resident = self.inner.slots.lock().find(id).cloned();
		if let Some(job) = resident {
			if job.user_id() != user_id {
				return Err(not_found(id));
			}
			if let Err(err) = job.cancel() {
				return Err(TransferError::Validation(format!("transfer {id} is already {}", err.from)));
			}
			info!(job_id = %id, "transfer cancelled");
			// Stay resident until the row says cancelled, so status reads never see the older row.
			persist(self.inner.sink.as_ref(), &job).await;
			self.inner.slots.lock().remove(&job);
			self.drain();
			return Ok(());
		}

		let record = match self.inner.sink.find_record(id).await? {
			Some(record) if record.user_id == user_id => record,
			_ => return Err(not_found(id)),
		};
		if record.status.is_terminal() {
			return Err(TransferError::Validation(format!(
				"transfer {id} is already {}",
				record.status
			)));
		}
		self.inner.sink.update_record(id, &TransferUpdate::cancelled(Utc::now())).await?;
		info!(job_id = %id, "stored transfer cancelled");
		Ok(())
	}

	pub fn get_queue_status(&self) -> QueueStatus {
		let slots = self.inner.slots.lock();
		QueueStatus {
			active: slots.active.len(),
			queued: slots.pending.len(),
			max_concurrent: self.inner.config.max_concurrent,
			total: slots.active.len() + slots.pending.len(),
		}
	}

	/// A user's transfers, newest first. Resident jobs report live state.
	pub async fn list_transfers(&self, user_id: &str) -> Result<Vec<TransferStats>, TransferError> {
		let now = Utc::now();
		let mut by_id: HashMap<String, TransferStats> = self
			.inner
			.sink
			.list_records(user_id)
			.await?
			.into_iter()
			.map(|r| (r.id.clone(), TransferStats::from_record(&r, now)))
			.collect();

		let live: Vec<Arc<TransferJob>> = {
			let slots = self.inner.slots.lock();
			slots
				.active
				.values()
				.chain(slots.pending.iter())
				.filter(|j| j.user_id() == user_id)
				.cloned()
				.collect()
		};
		for job in live {
			by_id.insert(job.id().to_string(), job.stats());
		}

		let mut out: Vec<TransferStats> = by_id.into_values().collect();
		out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
		Ok(out)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
		self.inner.events.subscribe()
	}

	/// Cancel everything queued or running. Returns how many jobs were cancelled.
	pub async fn shutdown(&self) -> usize {
		let jobs: Vec<Arc<TransferJob>> = {
			let mut slots = self.inner.slots.lock();
			let mut jobs: Vec<_> = slots.pending.drain(..).collect();
			jobs.extend(slots.active.drain().map(|(_, job)| job));
			jobs
		};

		let mut cancelled = 0;
		for job in jobs {
			if job.cancel().is_ok() {
				persist(self.inner.sink.as_ref(), &job).await;
				cancelled += 1;
			}
		}
		info!(cancelled, "dispatcher shut down");
		cancelled
	}

	fn spawn_pipeline(&self, job: Arc<TransferJob>) {
		let pipeline = Pipeline {
			accounts: self.inner.accounts.clone(),
			providers: self.inner.providers.clone(),
			sink: self.inner.sink.clone(),
			chunk_size: self.inner.config.chunk_size,
		};
		let slot = SlotGuard { dispatcher: self.clone(), job };
		tokio::spawn(async move {
			pipeline.run(&slot.job).await;
		});
	}

	/// Free the job's slot, unless a cancel already evicted it, and refill.
	fn release(&self, job: &Arc<TransferJob>) {
		self.inner.slots.lock().remove(job);
		self.drain();
	}

	async fn resolve(&self, account_id: &str, user_id: &str, role: &str) -> Result<Account, TransferError> {
		self.inner
			.accounts
			.resolve(account_id, user_id)
			.await?
			.ok_or_else(|| TransferError::NotFound(format!("{role} account {account_id}")))
	}

	/// Best-effort size and content type lookup. Never fails the request.
	async fn probe(&self, account: &Account, path: &str) -> FileInfo {
		let result = match self.inner.providers.create(&account.provider, &account.credentials) {
			Ok(provider) => provider.file_info(path).await.map_err(TransferError::from),
			Err(err) => Err(err),
		};
		match result {
			Ok(info) if !info.content_type.is_empty() => info,
			Ok(info) => FileInfo { size: info.size, content_type: DEFAULT_CONTENT_TYPE.to_string() },
			Err(err) => {
				warn!(account_id = %account.id, path, %err, "size probe failed, continuing with unknown size");
				FileInfo { size: 0, content_type: DEFAULT_CONTENT_TYPE.to_string() }
			}
		}
	}
}

/// Holds a pipeline's active slot. Dropping it frees the slot, so a
/// panicking pipeline cannot leak one.
///
/// A finished pipeline always leaves its job terminal; a job still live
/// here means the task died, and it is failed on the way out.
struct SlotGuard {
	dispatcher: Dispatcher,
	job: Arc<TransferJob>,
}

impl Drop for SlotGuard {
	fn drop(&mut self) {
		if !self.job.status().is_terminal() && self.job.fail(ABORTED).is_ok() {
			error!(job_id = %self.job.id(), "pipeline aborted");
			let sink = self.dispatcher.inner.sink.clone();
			let job = self.job.clone();
			tokio::spawn(async move { persist(sink.as_ref(), &job).await });
		}
		self.dispatcher.release(&self.job);
	}
}

fn validate(request: &TransferRequest) -> Result<(), TransferError> {
	if request.source_account_id == request.destination_account_id {
		return Err(TransferError::Validation(
			"source and destination accounts must differ".into(),
		));
	}
	for (field, value) in [
		("user_id", &request.user_id),
		("source_account_id", &request.source_account_id),
		("destination_account_id", &request.destination_account_id),
		("source_path", &request.source_path),
		("destination_path", &request.destination_path),
	] {
		if value.trim().is_empty() {
			return Err(TransferError::Validation(format!("{field} must not be empty")));
		}
	}
	Ok(())
}

fn not_found(id: &str) -> TransferError {
	TransferError::NotFound(format!("transfer {id}"))
}
