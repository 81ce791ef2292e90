pub mod migrations;
pub mod queries;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::{broadcast, mpsc};

use crate::errors::FetchError;
use crate::models::{Document, Filter};

/// Live snapshots for one query; each message is the full current result set.
pub type SnapshotReceiver = mpsc::Receiver<Vec<Document>>;

/// The document-store collaborator the dashboard reads from.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch_by_date(&self, collection: &str, date: &str) -> Result<Vec<Document>, FetchError> {
        self.fetch_all(collection, &[Filter::equals("date", date)]).await
    }

    async fn fetch_all(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, FetchError>;

    /// Opens a live query. The current result set is delivered first, then
    /// again after every change. Dropping the receiver closes the query.
    async fn watch(&self, collection: &str, filters: &[Filter]) -> Result<SnapshotReceiver, FetchError>;

    async fn ping(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// SQLite-backed document store with in-process change notification.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<String>,
}

impl SqliteStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(init_db(path)?))
    }

    pub fn new(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, FetchError> {
        lock_conn(&self.conn)
    }

    pub fn put(&self, collection: &str, doc: &Document) -> Result<(), FetchError> {
        {
            let conn = self.lock()?;
            queries::put_document(&conn, collection, doc)?;
        }
        self.notify(collection);
        Ok(())
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<bool, FetchError> {
        let removed = {
            let conn = self.lock()?;
            queries::delete_document(&conn, collection, id)?
        };
        if removed {
            self.notify(collection);
        }
        Ok(removed)
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, FetchError> {
        let conn = self.lock()?;
        queries::get_document(&conn, collection, id)
    }

    fn notify(&self, collection: &str) {
        // No watchers is fine
        let _ = self.changes.send(collection.to_string());
    }
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, FetchError> {
    conn.lock()
        .map_err(|_| FetchError::Store("database lock poisoned".to_string()))
}

fn query(
    conn: &Mutex<Connection>,
    collection: &str,
    filters: &[Filter],
) -> Result<Vec<Document>, FetchError> {
    let conn = lock_conn(conn)?;
    queries::list_documents(&conn, collection, filters)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn fetch_all(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, FetchError> {
        query(&self.conn, collection, filters)
    }

    async fn watch(&self, collection: &str, filters: &[Filter]) -> Result<SnapshotReceiver, FetchError> {
        // Subscribe before the first read so no write slips between them.
        let mut changes = self.changes.subscribe();
        let initial = query(&self.conn, collection, filters)?;

        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::clone(&self.conn);
        let collection = collection.to_string();
        let filters = filters.to_vec();

        tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == collection => {}
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(%collection, skipped, "watcher lagged, re-reading");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                let docs = match query(&conn, &collection, &filters) {
                    Ok(docs) => docs,
                    Err(e) => {
                        tracing::error!(%collection, error = %e, "live query failed");
                        continue;
                    }
                };
                if tx.send(docs).await.is_err() {
                    break;
                }
            }
            tracing::debug!(%collection, "live query closed");
        });

        Ok(rx)
    }

    async fn ping(&self) -> Result<(), FetchError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
