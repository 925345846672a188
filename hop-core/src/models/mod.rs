mod account;
mod transfer;

pub use account::{Account, Credentials};
pub use transfer::{
    elapsed_ms, eta_secs, JobState, JobStatus, ProgressEvent, QueueStatus, TransferRecord, TransferRequest,
    TransferStats, TransferTicket, TransferUpdate, DEFAULT_MAX_RETRIES,
};
