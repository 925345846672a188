use std::path::Path;

use hop_core::error::PersistenceError;
use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;

/// Wrapper around the SurrealDB handle.
/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct DbHandle {
    pub db: Surreal<Db>,
}

/// Open (or create) the on-disk database and run migrations.
pub async fn open(path: &Path) -> Result<DbHandle, PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Database(format!("{}: {e}", parent.display())))?;
    }
    let db = Surreal::new::<SurrealKv>(path.to_path_buf()).await.map_err(db_err)?;
    init(db).await
}

/// Throwaway database, used by tests and `--ephemeral` runs.
pub async fn open_in_memory() -> Result<DbHandle, PersistenceError> {
    let db = Surreal::new::<Mem>(()).await.map_err(db_err)?;
    init(db).await
}

async fn init(db: Surreal<Db>) -> Result<DbHandle, PersistenceError> {
    db.use_ns("hop").use_db("hop").await.map_err(db_err)?;
    run_migrations(&db).await?;
    Ok(DbHandle { db })
}

/// Run schema migrations. DEFINE statements are idempotent.
async fn run_migrations(db: &Surreal<Db>) -> Result<(), PersistenceError> {
    db.query(SCHEMA_V1).await.map_err(db_err)?.check().map_err(db_err)?;
    Ok(())
}

pub(crate) fn db_err(e: surrealdb::Error) -> PersistenceError {
    PersistenceError::Database(e.to_string())
}

// Timestamps are RFC 3339 strings so rows round-trip through serde as-is.
// priority / retry_count / max_retries are reserved; nothing reads them.
// revision holds the job version; stale updates are filtered on it.
const SCHEMA_V1: &str = "
    DEFINE TABLE OVERWRITE transfer SCHEMAFULL;
    DEFINE FIELD OVERWRITE job_id ON transfer TYPE string;
    DEFINE FIELD OVERWRITE user_id ON transfer TYPE string;
    DEFINE FIELD OVERWRITE source_account_id ON transfer TYPE string;
    DEFINE FIELD OVERWRITE destination_account_id ON transfer TYPE string;
    DEFINE FIELD OVERWRITE source_path ON transfer TYPE string;
    DEFINE FIELD OVERWRITE destination_path ON transfer TYPE string;
    DEFINE FIELD OVERWRITE file_name ON transfer TYPE string;
    DEFINE FIELD OVERWRITE status ON transfer TYPE string;
    DEFINE FIELD OVERWRITE progress ON transfer TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE file_size ON transfer TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE transferred_bytes ON transfer TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE transfer_speed ON transfer TYPE number DEFAULT 0;
    DEFINE FIELD OVERWRITE error ON transfer TYPE option<string>;
    DEFINE FIELD OVERWRITE priority ON transfer TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE retry_count ON transfer TYPE int DEFAULT 0;
    DEFINE FIELD OVERWRITE max_retries ON transfer TYPE int DEFAULT 3;
    DEFINE FIELD OVERWRITE created_at ON transfer TYPE string;
    DEFINE FIELD OVERWRITE started_at ON transfer TYPE option<string>;
    DEFINE FIELD OVERWRITE completed_at ON transfer TYPE option<string>;
    DEFINE FIELD OVERWRITE revision ON transfer TYPE int DEFAULT 0;
    DEFINE INDEX OVERWRITE idx_transfer_job_id ON transfer FIELDS job_id UNIQUE;
    DEFINE INDEX OVERWRITE idx_transfer_user ON transfer FIELDS user_id;
";
