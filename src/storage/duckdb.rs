use super::traits::{CheckpointRecord, CheckpointStore, RunSummary, StorageError, StoredLog};
use crate::model::RunId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Extract PID from DuckDB lock error message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    // Error format: "... (PID 12345) ..."
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// DuckDB implementation of the checkpoint store
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) a database file, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match Connection::open(path) {
            Ok(conn) => Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            }),
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("Could not set lock") {
                    if let Some(pid) = extract_pid_from_lock_error(&error_msg) {
                        tracing::error!(path = %path.display(), pid, "Checkpoint database is locked");
                        return Err(StorageError::Locked {
                            path: path.display().to_string(),
                            pid,
                        });
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Create an in-memory DuckDB store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard: MutexGuard<'_, Connection> = conn
                .lock()
                .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Join(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl CheckpointStore for DuckDbStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS run_checkpoints (
                    run_id VARCHAR NOT NULL,
                    version BIGINT NOT NULL,
                    format_version INTEGER NOT NULL,
                    state_json VARCHAR NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (run_id, version)
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS run_logs (
                    run_id VARCHAR PRIMARY KEY,
                    digest VARCHAR NOT NULL,
                    content VARCHAR NOT NULL
                )",
                [],
            )?;

            Ok(())
        })
        .await
    }

    async fn put(&self, record: &CheckpointRecord) -> Result<(), StorageError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO run_checkpoints (run_id, version, format_version, state_json, created_at)
                 VALUES (?, ?, ?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![
                    record.run_id.as_str(),
                    record.version as i64,
                    record.format_version as i64,
                    record.state_json,
                    record.created_at.timestamp_micros(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn latest(&self, run_id: &RunId) -> Result<Option<CheckpointRecord>, StorageError> {
        let run_id = run_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT version, format_version, state_json, epoch_us(created_at)
                 FROM run_checkpoints
                 WHERE run_id = ?
                 ORDER BY version DESC
                 LIMIT 1",
            )?;
            let mut rows = stmt.query([run_id.as_str()])?;
            let row = match rows.next()? {
                Some(row) => Some((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                )),
                None => None,
            };

            Ok(row.map(|(version, format_version, state_json, created_us)| CheckpointRecord {
                run_id,
                version: version as u64,
                format_version: format_version as u32,
                state_json,
                created_at: from_micros(created_us),
            }))
        })
        .await
    }

    async fn prune(&self, run_id: &RunId, keep_version: u64) -> Result<usize, StorageError> {
        let run_id = run_id.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM run_checkpoints WHERE run_id = ? AND version < ?",
                duckdb::params![run_id.as_str(), keep_version as i64],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn put_log(&self, log: &StoredLog) -> Result<(), StorageError> {
        let log = log.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO run_logs (run_id, digest, content) VALUES (?, ?, ?)",
                duckdb::params![log.run_id.as_str(), log.digest, log.content],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_log(&self, run_id: &RunId) -> Result<Option<StoredLog>, StorageError> {
        let run_id = run_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT digest, content FROM run_logs WHERE run_id = ?")?;
            let mut rows = stmt.query([run_id.as_str()])?;
            let row = match rows.next()? {
                Some(row) => Some((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                None => None,
            };
            Ok(row.map(|(digest, content)| StoredLog {
                run_id,
                digest,
                content,
            }))
        })
        .await
    }

    async fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, max(version), epoch_us(max(created_at))
                 FROM run_checkpoints
                 GROUP BY run_id
                 ORDER BY max(created_at) DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                let run_id: String = row.get(0)?;
                let version: i64 = row.get(1)?;
                let saved_us: i64 = row.get(2)?;
                runs.push(RunSummary {
                    run_id: RunId::new(run_id),
                    latest_version: version as u64,
                    saved_at: from_micros(saved_us),
                });
            }
            Ok(runs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> DuckDbStore {
        let store = DuckDbStore::in_memory().unwrap();
        store.init_schema().await.unwrap();
        store
    }

    fn record(run: &str, version: u64) -> CheckpointRecord {
        CheckpointRecord {
            run_id: RunId::from(run),
            version,
            format_version: 1,
            state_json: format!("{{\"v\":{}}}", version),
            created_at: from_micros(Utc::now().timestamp_micros()),
        }
    }

    #[test]
    fn test_extract_pid() {
        assert_eq!(
            extract_pid_from_lock_error("IO Error: Could not set lock on file (PID 4242) held"),
            Some(4242)
        );
        assert_eq!(extract_pid_from_lock_error("no pid here"), None);
    }

    #[tokio::test]
    async fn test_latest_returns_highest_version() {
        let store = store().await;
        store.put(&record("a", 1)).await.unwrap();
        store.put(&record("a", 3)).await.unwrap();
        store.put(&record("a", 2)).await.unwrap();
        store.put(&record("b", 7)).await.unwrap();

        let latest = store.latest(&RunId::from("a")).await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.state_json, "{\"v\":3}");
        assert!(store.latest(&RunId::from("zzz")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_same_version_replaces() {
        let store = store().await;
        store.put(&record("a", 1)).await.unwrap();
        let mut again = record("a", 1);
        again.state_json = "{}".to_string();
        store.put(&again).await.unwrap();

        let latest = store.latest(&RunId::from("a")).await.unwrap().unwrap();
        assert_eq!(latest.state_json, "{}");
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let store = store().await;
        for v in 1..=4 {
            store.put(&record("a", v)).await.unwrap();
        }
        store.put(&record("b", 1)).await.unwrap();

        let removed = store.prune(&RunId::from("a"), 4).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.latest(&RunId::from("a")).await.unwrap().unwrap().version, 4);
        assert!(store.latest(&RunId::from("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_logs_and_listing() {
        let store = store().await;
        let log = StoredLog {
            run_id: RunId::from("a"),
            digest: "d".to_string(),
            content: "line\n".to_string(),
        };
        store.put_log(&log).await.unwrap();
        assert_eq!(store.get_log(&RunId::from("a")).await.unwrap(), Some(log));
        assert!(store.get_log(&RunId::from("b")).await.unwrap().is_none());

        store.put(&record("a", 1)).await.unwrap();
        store.put(&record("a", 2)).await.unwrap();
        store.put(&record("b", 5)).await.unwrap();
        let mut runs = store.list_runs().await.unwrap();
        runs.sort_by(|x, y| x.run_id.cmp(&y.run_id));
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].latest_version, 2);
        assert_eq!(runs[1].latest_version, 5);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoints.duckdb");
        {
            let store = DuckDbStore::open(&path).unwrap();
            store.init_schema().await.unwrap();
            store.put(&record("a", 1)).await.unwrap();
        }
        let store = DuckDbStore::open(&path).unwrap();
        store.init_schema().await.unwrap();
        assert_eq!(store.latest(&RunId::from("a")).await.unwrap().unwrap().version, 1);
    }
}
