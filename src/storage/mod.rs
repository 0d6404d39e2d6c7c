pub mod repository;

use async_trait::async_trait;
use rusqlite_migration::{Migrations, M};

use crate::correspondence::{CorrespondenceMap, CorrespondenceStore, Link};
use crate::error::{Error, Result};

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open the database at the default path (`~/.jira-glpi-sync/sync.db`).
    pub async fn open() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".jira-glpi-sync");
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        Self::open_at(dir.join("sync.db")).await
    }

    /// Open the database at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // In-memory DBs are per-connection, so reader and writer share one.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| e.to_string())?;
            let migrations = Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn).map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }
}

#[async_trait]
impl CorrespondenceStore for Database {
    async fn load(&self) -> Result<CorrespondenceMap> {
        let links = self.reader.call(|conn| repository::load_links(conn)).await?;
        Ok(CorrespondenceMap::from_links(links))
    }

    async fn save(&self, map: &CorrespondenceMap) -> Result<()> {
        let links: Vec<Link> = map.links().cloned().collect();
        self.writer
            .call(move |conn| repository::replace_links(conn, &links))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::ConflictRule;
    use crate::ticket::SourceSystem;

    #[tokio::test]
    async fn test_open_memory() {
        let db = Database::open_memory().await.unwrap();

        let tables: Vec<String> = db
            .reader()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok::<Vec<String>, rusqlite::Error>(rows.filter_map(|r| r.ok()).collect())
            })
            .await
            .unwrap();

        for table in ["links", "glpi_users", "app_config", "sync_runs"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let db = Database::open_memory().await.unwrap();
        assert!(db.load().await.unwrap().is_empty());

        let mut map = CorrespondenceMap::new();
        map.link(Link::new("10001", "7", Some(SourceSystem::Jira)), ConflictRule::Reject)
            .unwrap();
        map.link(Link::new("10002", "8", Some(SourceSystem::Glpi)), ConflictRule::Reject)
            .unwrap();
        db.save(&map).await.unwrap();

        let loaded = db.load().await.unwrap();
        assert_eq!(loaded, map);

        map.unlink_jira("10001");
        db.save(&map).await.unwrap();
        let loaded = db.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.counterpart(SourceSystem::Glpi, "8"), Some("10002"));
    }

    #[tokio::test]
    async fn test_open_at_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let db = Database::open_at(&path).await.unwrap();
            let mut map = CorrespondenceMap::new();
            map.link(Link::new("1", "a", None), ConflictRule::Reject).unwrap();
            db.save(&map).await.unwrap();
        }
        let db = Database::open_at(&path).await.unwrap();
        assert_eq!(db.load().await.unwrap().len(), 1);
    }
}
