use async_trait::async_trait;
use hop_core::{
	error::PersistenceError,
	models::{TransferRecord, TransferUpdate},
	store::PersistenceSink,
};
use serde_json::{Map, Value};

use crate::db::{db_err, DbHandle};

/// Transfer history in the embedded SurrealDB `transfer` table.
///
/// Rows are keyed by a `job_id` field rather than the record id, so the
/// engine can mint ids before the first write.
#[derive(Clone)]
pub struct SurrealSink {
	db: DbHandle,
}

impl SurrealSink {
	pub fn new(db: DbHandle) -> Self {
		SurrealSink { db }
	}
}

#[async_trait]
impl PersistenceSink for SurrealSink {
	async fn create_record(&self, record: &TransferRecord) -> Result<(), PersistenceError> {
		let content = to_content(record)?;
		self.db
			.db
			.query("CREATE transfer CONTENT $content")
			.bind(("content", content))
			.await
			.map_err(db_err)?
			.check()
			.map_err(db_err)?;
		Ok(())
	}

	async fn update_record(&self, id: &str, update: &TransferUpdate) -> Result<(), PersistenceError> {
		let mut patch = to_object(update)?;
		rename(&mut patch, "version", "revision");
		let query = match update.version {
			Some(_) => "UPDATE transfer MERGE $patch WHERE job_id = $job_id AND revision < $revision RETURN job_id",
			None => "UPDATE transfer MERGE $patch WHERE job_id = $job_id RETURN job_id",
		};
		let mut response = self
			.db
			.db
			.query(query)
			.bind(("patch", Value::Object(patch)))
			.bind(("job_id", id.to_string()))
			.bind(("revision", Value::from(update.version.unwrap_or(0))))
			.await
			.map_err(db_err)?;

		let rows: Vec<Value> = response.take(0).map_err(db_err)?;
		if !rows.is_empty() {
			return Ok(());
		}
		// Nothing matched: either the row is missing or it already holds a newer version.
		match (update.version, self.find_record(id).await?) {
			(Some(_), Some(_)) => Ok(()),
			_ => Err(PersistenceError::Database(format!("transfer {id} not found"))),
		}
	}

	async fn find_record(&self, id: &str) -> Result<Option<TransferRecord>, PersistenceError> {
		let mut response = self
			.db
			.db
			.query("SELECT * OMIT id FROM transfer WHERE job_id = $job_id")
			.bind(("job_id", id.to_string()))
			.await
			.map_err(db_err)?;

		let row: Option<Value> = response.take(0).map_err(db_err)?;
		row.map(from_row).transpose()
	}

	async fn list_records(&self, user_id: &str) -> Result<Vec<TransferRecord>, PersistenceError> {
		let mut response = self
			.db
			.db
			.query("SELECT * OMIT id FROM transfer WHERE user_id = $user_id")
			.bind(("user_id", user_id.to_string()))
			.await
			.map_err(db_err)?;

		let rows: Vec<Value> = response.take(0).map_err(db_err)?;
		let mut records = rows.into_iter().map(from_row).collect::<Result<Vec<_>, _>>()?;
		records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
		Ok(records)
	}
}

/// Serialize to a JSON object, dropping nulls so optional columns stay NONE.
fn to_object<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>, PersistenceError> {
	match serde_json::to_value(value).map_err(|e| PersistenceError::Decode(e.to_string()))? {
		Value::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
		other => Err(PersistenceError::Decode(format!("expected an object, got {other}"))),
	}
}

/// Column names differ from field names where SurrealQL reserves the word.
fn rename(map: &mut Map<String, Value>, from: &str, to: &str) {
	if let Some(value) = map.remove(from) {
		map.insert(to.into(), value);
	}
}

fn to_content(record: &TransferRecord) -> Result<Value, PersistenceError> {
	let mut map = to_object(record)?;
	rename(&mut map, "id", "job_id");
	rename(&mut map, "version", "revision");
	Ok(Value::Object(map))
}

fn from_row(row: Value) -> Result<TransferRecord, PersistenceError> {
	let mut map = match row {
		Value::Object(map) => map,
		other => return Err(PersistenceError::Decode(format!("unexpected row shape: {other}"))),
	};
	rename(&mut map, "job_id", "id");
	rename(&mut map, "revision", "version");
	serde_json::from_value(Value::Object(map)).map_err(|e| PersistenceError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
	use chrono::{Duration, Utc};
	use hop_core::models::{JobStatus, DEFAULT_MAX_RETRIES};

	use super::*;
	use crate::db;

	fn record(id: &str, user_id: &str, age_secs: i64) -> TransferRecord {
		TransferRecord {
			id: id.into(),
			user_id: user_id.into(),
			source_account_id: "src".into(),
			destination_account_id: "dst".into(),
			source_path: "/in/a.txt".into(),
			destination_path: "/out/a.txt".into(),
			file_name: "a.txt".into(),
			status: JobStatus::Queued,
			progress: 0,
			file_size: 1000,
			transferred_bytes: 0,
			transfer_speed: 0.0,
			error: None,
			priority: 0,
			retry_count: 0,
			max_retries: DEFAULT_MAX_RETRIES,
			created_at: Utc::now() - Duration::seconds(age_secs),
			started_at: None,
			completed_at: None,
			version: 0,
		}
	}

	#[test]
	fn content_renames_id_and_drops_nulls() {
		let content = to_content(&record("j1", "u1", 0)).unwrap();
		assert_eq!(content["job_id"], "j1");
		assert!(content.get("id").is_none());
		assert!(content.get("error").is_none());
		assert!(content.get("started_at").is_none());
		assert_eq!(content["status"], "queued");
		assert_eq!(content["revision"], 0);
		assert!(content.get("version").is_none());
	}

	#[test]
	fn row_maps_back_to_record() {
		let original = record("j1", "u1", 0);
		let back = from_row(to_content(&original).unwrap()).unwrap();
		assert_eq!(back, original);
	}

	#[test]
	fn malformed_row_is_a_decode_error() {
		let err = from_row(Value::String("nope".into())).unwrap_err();
		assert!(matches!(err, PersistenceError::Decode(_)));
	}

	#[tokio::test]
	async fn stores_and_updates_transfers() {
		let sink = SurrealSink::new(db::open_in_memory().await.unwrap());
		sink.create_record(&record("j1", "u1", 30)).await.unwrap();
		sink.create_record(&record("j2", "u1", 0)).await.unwrap();
		sink.create_record(&record("j3", "u2", 0)).await.unwrap();

		let now = Utc::now();
		let update = TransferUpdate {
			status: Some(JobStatus::Failed),
			error: Some("NetworkError".into()),
			started_at: Some(now),
			completed_at: Some(now),
			..Default::default()
		};
		sink.update_record("j1", &update).await.unwrap();

		let j1 = sink.find_record("j1").await.unwrap().unwrap();
		assert_eq!(j1.status, JobStatus::Failed);
		assert_eq!(j1.error.as_deref(), Some("NetworkError"));
		assert_eq!(j1.file_size, 1000);
		assert!(j1.started_at.is_some());

		let ids: Vec<String> = sink.list_records("u1").await.unwrap().into_iter().map(|r| r.id).collect();
		assert_eq!(ids, vec!["j2", "j1"]);

		assert_eq!(sink.find_record("missing").await.unwrap(), None);
		assert!(sink.update_record("missing", &update).await.is_err());
	}

	#[tokio::test]
	async fn older_versions_never_overwrite_newer_ones() {
		let sink = SurrealSink::new(db::open_in_memory().await.unwrap());
		sink.create_record(&record("j1", "u1", 0)).await.unwrap();

		let cancelled = TransferUpdate {
			status: Some(JobStatus::Cancelled),
			completed_at: Some(Utc::now()),
			version: Some(4),
			..Default::default()
		};
		sink.update_record("j1", &cancelled).await.unwrap();

		let late = TransferUpdate { status: Some(JobStatus::Running), progress: Some(30), version: Some(2), ..Default::default() };
		sink.update_record("j1", &late).await.unwrap();

		let j1 = sink.find_record("j1").await.unwrap().unwrap();
		assert_eq!(j1.status, JobStatus::Cancelled);
		assert_eq!(j1.progress, 0);
		assert_eq!(j1.version, 4);
		assert!(sink.update_record("missing", &late).await.is_err());
	}
}
