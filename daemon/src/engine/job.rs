use chrono::{DateTime, Utc};
use hop_core::{
	models::{
		elapsed_ms, eta_secs, JobState, JobStatus, ProgressEvent, TransferRecord, TransferRequest, TransferStats,
		TransferUpdate, DEFAULT_MAX_RETRIES,
	},
	TransitionError,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Half of the overall progress bar a pipeline phase maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Download,
	Upload,
}

impl Phase {
	/// Download fills 0..=50, upload fills 50..=100.
	pub fn overall_progress(self, transferred: u64, total: u64) -> u8 {
		let half = (percent(transferred, total) * 0.5).round() as u8;
		match self {
			Phase::Download => half,
			Phase::Upload => 50 + half,
		}
	}
}

fn percent(transferred: u64, total: u64) -> f64 {
	if total == 0 {
		return 0.0;
	}
	(transferred.min(total) as f64 / total as f64) * 100.0
}

struct Counters {
	state: JobState,
	progress: u8,
	file_size: u64,
	transferred_bytes: u64,
	transfer_speed: f64,
	version: u64,
}

/// One transfer while it lives in the dispatcher.
///
/// Identity is immutable. Everything else sits behind one lock so the
/// dispatcher (cancel) and the owning pipeline (progress, terminal write)
/// serialize through the state machine: whichever terminal write lands
/// first wins and the other gets a [`TransitionError`].
pub struct TransferJob {
	id: String,
	user_id: String,
	source_account_id: String,
	destination_account_id: String,
	source_path: String,
	destination_path: String,
	file_name: String,
	content_type: String,
	created_at: DateTime<Utc>,
	counters: Mutex<Counters>,
	cancel: CancellationToken,
	events: broadcast::Sender<ProgressEvent>,
}

impl TransferJob {
	pub fn new(
		id: String,
		request: &TransferRequest,
		file_size: u64,
		content_type: String,
		events: broadcast::Sender<ProgressEvent>,
	) -> Self {
		TransferJob {
			id,
			user_id: request.user_id.clone(),
			source_account_id: request.source_account_id.clone(),
			destination_account_id: request.destination_account_id.clone(),
			source_path: request.source_path.clone(),
			destination_path: request.destination_path.clone(),
			file_name: request.resolved_file_name(),
			content_type,
			created_at: Utc::now(),
			counters: Mutex::new(Counters {
				state: JobState::Queued,
				progress: 0,
				file_size,
				transferred_bytes: 0,
				transfer_speed: 0.0,
				version: 0,
			}),
			cancel: CancellationToken::new(),
			events,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	pub fn source_account_id(&self) -> &str {
		&self.source_account_id
	}

	pub fn destination_account_id(&self) -> &str {
		&self.destination_account_id
	}

	pub fn source_path(&self) -> &str {
		&self.source_path
	}

	pub fn destination_path(&self) -> &str {
		&self.destination_path
	}

	pub fn content_type(&self) -> &str {
		&self.content_type
	}

	pub fn status(&self) -> JobStatus {
		self.counters.lock().state.status()
	}

	pub fn file_size(&self) -> u64 {
		self.counters.lock().file_size
	}

	/// Tripped by [`TransferJob::cancel`]; the pipeline selects on it.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn start(&self) -> Result<(), TransitionError> {
		self.transition(|state, now| state.start(now))
	}

	/// Sets `progress = round(transferred / total * 100)`, or 0 when the
	/// total is unknown. Ignored unless the job is running.
	pub fn update_progress(&self, transferred: u64, total: u64, speed: f64) -> bool {
		let pct = percent(transferred, total).round() as u8;
		self.record_progress(pct, transferred, total, speed)
	}

	/// Like [`TransferJob::update_progress`] but maps the phase's own
	/// percentage onto its half of the overall bar.
	pub fn update_phase_progress(&self, phase: Phase, transferred: u64, total: u64, speed: f64) -> bool {
		self.record_progress(phase.overall_progress(transferred, total), transferred, total, speed)
	}

	/// Fill in the size when the probe could not. A known size is kept.
	pub fn establish_file_size(&self, size: u64) {
		let mut c = self.counters.lock();
		if c.file_size == 0 && size > 0 {
			c.file_size = size;
		}
	}

	pub fn complete(&self) -> Result<(), TransitionError> {
		let mut c = self.counters.lock();
		let next = c.state.complete(Utc::now())?;
		c.state = next;
		c.progress = 100;
		if c.file_size > 0 {
			c.transferred_bytes = c.file_size;
		} else {
			c.file_size = c.transferred_bytes;
		}
		self.publish(&mut c);
		Ok(())
	}

	pub fn fail(&self, error: &str) -> Result<(), TransitionError> {
		self.transition(|state, now| state.fail(error, now))
	}

	/// Move to cancelled and trip the cancellation token.
	pub fn cancel(&self) -> Result<(), TransitionError> {
		self.transition(|state, now| state.cancel(now))?;
		self.cancel.cancel();
		Ok(())
	}

	pub fn stats(&self) -> TransferStats {
		let c = self.counters.lock();
		let now = Utc::now();
		TransferStats {
			id: self.id.clone(),
			user_id: self.user_id.clone(),
			source_account_id: self.source_account_id.clone(),
			destination_account_id: self.destination_account_id.clone(),
			source_path: self.source_path.clone(),
			destination_path: self.destination_path.clone(),
			file_name: self.file_name.clone(),
			status: c.state.status(),
			progress: c.progress,
			file_size: c.file_size,
			transferred_bytes: c.transferred_bytes,
			transfer_speed: c.transfer_speed,
			error: c.state.error().map(String::from),
			created_at: self.created_at,
			started_at: c.state.started_at(),
			completed_at: c.state.completed_at(),
			elapsed_ms: elapsed_ms(c.state.started_at(), c.state.completed_at(), now),
			eta_secs: if c.state.is_terminal() {
				None
			} else {
				eta_secs(c.file_size, c.transferred_bytes, c.transfer_speed)
			},
			version: c.version,
		}
	}

	/// Full row for the initial insert.
	pub fn record(&self) -> TransferRecord {
		let c = self.counters.lock();
		TransferRecord {
			id: self.id.clone(),
			user_id: self.user_id.clone(),
			source_account_id: self.source_account_id.clone(),
			destination_account_id: self.destination_account_id.clone(),
			source_path: self.source_path.clone(),
			destination_path: self.destination_path.clone(),
			file_name: self.file_name.clone(),
			status: c.state.status(),
			progress: c.progress,
			file_size: c.file_size,
			transferred_bytes: c.transferred_bytes,
			transfer_speed: c.transfer_speed,
			error: c.state.error().map(String::from),
			priority: 0,
			retry_count: 0,
			max_retries: DEFAULT_MAX_RETRIES,
			created_at: self.created_at,
			started_at: c.state.started_at(),
			completed_at: c.state.completed_at(),
			version: c.version,
		}
	}

	/// Every mutable column, for flushing the current state.
	pub fn snapshot(&self) -> TransferUpdate {
		let c = self.counters.lock();
		TransferUpdate {
			status: Some(c.state.status()),
			progress: Some(c.progress),
			file_size: Some(c.file_size),
			transferred_bytes: Some(c.transferred_bytes),
			transfer_speed: Some(c.transfer_speed),
			error: c.state.error().map(String::from),
			started_at: c.state.started_at(),
			completed_at: c.state.completed_at(),
			version: Some(c.version),
		}
	}

	fn transition<F>(&self, f: F) -> Result<(), TransitionError>
	where
		F: FnOnce(&JobState, DateTime<Utc>) -> Result<JobState, TransitionError>,
	{
		let mut c = self.counters.lock();
		let next = f(&c.state, Utc::now())?;
		c.state = next;
		self.publish(&mut c);
		Ok(())
	}

	fn record_progress(&self, pct: u8, transferred: u64, total: u64, speed: f64) -> bool {
		let mut c = self.counters.lock();
		if c.state.status() != JobStatus::Running {
			return false;
		}
		if c.file_size == 0 && total > 0 {
			c.file_size = total;
		}
		c.progress = c.progress.max(pct.min(100));
		c.transferred_bytes = if c.file_size > 0 { transferred.min(c.file_size) } else { transferred };
		c.transfer_speed = speed.max(0.0);
		self.publish(&mut c);
		true
	}

	/// Runs under the counters lock so events leave in version order.
	fn publish(&self, c: &mut Counters) {
		c.version += 1;
		// No subscribers is fine.
		let _ = self.events.send(ProgressEvent {
			job_id: self.id.clone(),
			status: c.state.status(),
			progress: c.progress,
			transferred: c.transferred_bytes,
			total: c.file_size,
			speed: c.transfer_speed,
			error: c.state.error().map(String::from),
			version: c.version,
		});
	}
}

impl std::fmt::Debug for TransferJob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransferJob")
			.field("id", &self.id)
			.field("status", &self.status())
			.finish_non_exhaustive()
	}
}
