//! SQLite-backed document store
//!
//! Each entity is stored as a JSON document next to the columns the
//! engine filters on (kind, parent, status, version). The database lives
//! in `.sitecare/store.db`; `open_in_memory` is used by tests. Issue
//! numbers are allocated from the `sequences` table, which survives a
//! documents schema reset.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};

use crate::core::entity::Entity;
use crate::core::error::StoreError;
use crate::core::identity::EntityId;
use crate::core::store::{Repository, Sequences, StoreResult};

/// Current schema version - documents table is recreated on mismatch
const SCHEMA_VERSION: i32 = 1;

/// Handle to one SQLite database shared by all collections
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Typed view over the documents of one entity kind
    pub fn collection<E: Entity>(&self) -> SqliteRepository<E> {
        SqliteRepository {
            conn: Arc::clone(&self.conn),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl Sequences for SqliteStore {
    async fn next(&self, scope: &str, floor: u32) -> StoreResult<u32> {
        let scope = scope.to_string();
        blocking(&self.conn, move |conn| {
            let value: i64 = conn.query_row(
                "INSERT INTO sequences (scope, value) VALUES (?1, ?2 + 1)
                 ON CONFLICT(scope) DO UPDATE SET value = MAX(value, ?2) + 1
                 RETURNING value",
                params![scope, floor as i64],
                |row| row.get(0),
            )?;
            u32::try_from(value)
                .map_err(|_| StoreError::Unavailable(format!("sequence '{}' is exhausted", scope)))
        })
        .await
    }
}

/// Run a blocking query off the async worker threads
async fn blocking<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock();
        f(&guard)
    })
    .await
    .map_err(|e| StoreError::Unavailable(e.to_string()))?
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS sequences (
            scope TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        "#,
    )?;

    let current: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    if current == SCHEMA_VERSION {
        return Ok(());
    }

    tracing::info!(from = current, to = SCHEMA_VERSION, "Initializing store schema");
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS documents;

        CREATE TABLE documents (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            status TEXT NOT NULL,
            version INTEGER NOT NULL,
            created TEXT NOT NULL,
            body TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(kind, parent_id);
        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(kind, parent_id, status);

        DELETE FROM schema_version;
        "#,
    )?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

/// One entity kind inside a [`SqliteStore`]
pub struct SqliteRepository<E> {
    conn: Arc<Mutex<Connection>>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteRepository<E> {
    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        blocking(&self.conn, f).await
    }
}

fn decode_all<E: Entity>(bodies: Vec<String>) -> StoreResult<Vec<E>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

fn collect_bodies(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<String>> {
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut bodies = Vec::new();
    for row in rows {
        bodies.push(row?);
    }
    Ok(bodies)
}

#[async_trait]
impl<E: Entity> Repository<E> for SqliteRepository<E> {
    async fn create(&self, mut entity: E) -> StoreResult<E> {
        entity.set_version(1);
        let body = serde_json::to_string(&entity)?;
        let row = (
            entity.id().to_string(),
            entity.parent_id(),
            entity.status().to_string(),
            entity.created().to_rfc3339(),
        );

        self.run(move |conn| {
            let result = conn.execute(
                "INSERT INTO documents (id, kind, parent_id, status, version, created, body)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                params![row.0, E::PREFIX.as_str(), row.1, row.2, row.3, body],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate(row.0))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        Ok(entity)
    }

    async fn update(&self, mut entity: E) -> StoreResult<E> {
        let expected = entity.version();
        entity.set_version(expected + 1);
        let body = serde_json::to_string(&entity)?;
        let id = entity.id().to_string();
        let status = entity.status().to_string();
        let parent = entity.parent_id();

        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT version FROM documents WHERE id = ?1 AND kind = ?2",
                    params![id, E::PREFIX.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(found) = found else {
                return Err(StoreError::NotFound {
                    kind: E::PREFIX.kind(),
                    id,
                });
            };
            let found = found as u64;
            if found != expected {
                return Err(StoreError::Conflict {
                    id,
                    expected,
                    found,
                });
            }

            let changed = conn.execute(
                "UPDATE documents SET parent_id = ?1, status = ?2, version = ?3, body = ?4
                 WHERE id = ?5 AND version = ?6",
                params![
                    parent,
                    status,
                    (expected + 1) as i64,
                    body,
                    id,
                    expected as i64
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::Conflict {
                    id,
                    expected,
                    found: expected + 1,
                });
            }
            Ok(())
        })
        .await?;

        Ok(entity)
    }

    async fn get_by_id(&self, id: &EntityId) -> StoreResult<Option<E>> {
        let id = id.to_string();
        let body: Option<String> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT body FROM documents WHERE id = ?1 AND kind = ?2",
                        params![id, E::PREFIX.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn find_by_parent(&self, parent_id: &str) -> StoreResult<Vec<E>> {
        let parent_id = parent_id.to_string();
        let bodies = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM documents WHERE kind = ?1 AND parent_id = ?2
                     ORDER BY created, id",
                )?;
                collect_bodies(&mut stmt, params![E::PREFIX.as_str(), parent_id])
            })
            .await?;
        decode_all(bodies)
    }

    async fn find_by_status(
        &self,
        parent_id: &str,
        statuses: &[E::Status],
    ) -> StoreResult<Vec<E>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut values = vec![E::PREFIX.as_str().to_string(), parent_id.to_string()];
        values.extend(statuses.iter().map(|s| s.to_string()));
        let placeholders = (3..values.len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT body FROM documents WHERE kind = ?1 AND parent_id = ?2
             AND status IN ({}) ORDER BY created, id",
            placeholders
        );

        let bodies = self
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                collect_bodies(&mut stmt, params_from_iter(values.iter()))
            })
            .await?;
        decode_all(bodies)
    }

    async fn delete(&self, id: &EntityId) -> StoreResult<()> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM documents WHERE id = ?1 AND kind = ?2",
                params![id, E::PREFIX.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    kind: E::PREFIX.kind(),
                    id,
                });
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::issue::{Issue, IssueSeverity, IssueStatus, NewIssue};
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample(blueprint: &str) -> Issue {
        Issue::new(
            NewIssue {
                blueprint_id: blueprint.to_string(),
                title: "Leaking joint".to_string(),
                severity: IssueSeverity::Major,
                ..Default::default()
            },
            1,
            "alice",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_roundtrip_through_sqlite() {
        let store = SqliteStore::open_in_memory().unwrap();
        let issues = store.collection::<Issue>();

        let created = issues.create(sample("BP-1")).await.unwrap();
        let loaded = issues.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Leaking joint");
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_update_version_check() {
        let store = SqliteStore::open_in_memory().unwrap();
        let issues = store.collection::<Issue>();
        let created = issues.create(sample("BP-1")).await.unwrap();

        let mut a = created.clone();
        a.status = IssueStatus::InProgress;
        let a = issues.update(a).await.unwrap();
        assert_eq!(a.version, 2);

        let err = issues.update(created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { found: 2, .. }));
    }

    #[tokio::test]
    async fn test_find_by_status_filters_in_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        let issues = store.collection::<Issue>();
        let first = issues.create(sample("BP-1")).await.unwrap();
        issues.create(sample("BP-1")).await.unwrap();
        issues.create(sample("BP-2")).await.unwrap();

        let mut first = first;
        first.status = IssueStatus::InProgress;
        issues.update(first).await.unwrap();

        let in_progress = issues
            .find_by_status("BP-1", &[IssueStatus::InProgress, IssueStatus::Resolved])
            .await
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert!(issues.find_by_status("BP-1", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequences_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.next("BP-1", 0).await.unwrap(), 1);
            assert_eq!(store.next("BP-1", 0).await.unwrap(), 2);
            assert_eq!(store.next("BP-2", 5).await.unwrap(), 6);
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.next("BP-1", 0).await.unwrap(), 3);
        assert_eq!(store.next("BP-1", 1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_delete_and_persist_across_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store.db");

        let kept_id = {
            let store = SqliteStore::open(&path).unwrap();
            let issues = store.collection::<Issue>();
            let kept = issues.create(sample("BP-1")).await.unwrap();
            let gone = issues.create(sample("BP-1")).await.unwrap();
            issues.delete(&gone.id).await.unwrap();
            assert!(issues.delete(&gone.id).await.is_err());
            kept.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let issues = store.collection::<Issue>();
        assert!(issues.get_by_id(&kept_id).await.unwrap().is_some());
        assert_eq!(issues.find_by_parent("BP-1").await.unwrap().len(), 1);
    }
}
