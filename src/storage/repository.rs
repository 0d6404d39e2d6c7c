use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::correspondence::Link;
use crate::sync::SyncReport;
use crate::ticket::SourceSystem;

// ── Links ──────────────────────────────────────────────────────────

fn origin_to_sql(origin: Option<SourceSystem>) -> Option<&'static str> {
    origin.map(SourceSystem::tag)
}

fn origin_from_sql(raw: Option<String>) -> Option<SourceSystem> {
    raw.and_then(|s| s.parse().ok())
}

pub fn load_links(conn: &Connection) -> Result<Vec<Link>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT jira_id, glpi_id, origin FROM links ORDER BY created_at, jira_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Link {
            jira_id: row.get(0)?,
            glpi_id: row.get(1)?,
            origin: origin_from_sql(row.get(2)?),
        })
    })?;
    rows.collect()
}

/// Overwrite the whole table with `links`. Rows that survive keep their
/// existing `created_at`.
pub fn replace_links(conn: &mut Connection, links: &[Link]) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS keep_links (jira_id TEXT PRIMARY KEY, glpi_id TEXT, origin TEXT);
         DELETE FROM keep_links;",
    )?;
    {
        let mut insert =
            tx.prepare("INSERT INTO keep_links (jira_id, glpi_id, origin) VALUES (?1, ?2, ?3)")?;
        for link in links {
            insert.execute(params![link.jira_id, link.glpi_id, origin_to_sql(link.origin)])?;
        }
    }
    tx.execute_batch(
        "DELETE FROM links WHERE NOT EXISTS (
            SELECT 1 FROM keep_links k
            WHERE k.jira_id = links.jira_id AND k.glpi_id = links.glpi_id
         );
         INSERT INTO links (jira_id, glpi_id, origin, created_at)
            SELECT k.jira_id, k.glpi_id, k.origin, datetime('now') FROM keep_links k
            WHERE NOT EXISTS (SELECT 1 FROM links l WHERE l.jira_id = k.jira_id);
         UPDATE links SET origin = (
            SELECT k.origin FROM keep_links k WHERE k.jira_id = links.jira_id
         ) WHERE origin IS NULL;
         DELETE FROM keep_links;",
    )?;
    tx.commit()
}

pub fn count_links(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
    Ok(n as u64)
}

// ── GLPI users ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlpiUserRow {
    pub identity: String,
    pub glpi_user_id: u64,
    pub source: String,
    pub updated_at: String,
}

pub fn upsert_glpi_user(
    conn: &Connection,
    identity: &str,
    glpi_user_id: u64,
    source: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO glpi_users (identity, glpi_user_id, source, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(identity) DO UPDATE SET
           glpi_user_id = excluded.glpi_user_id,
           source = excluded.source,
           updated_at = excluded.updated_at",
        params![identity, glpi_user_id as i64, source],
    )?;
    Ok(())
}

/// Drop every row that came from `source` and insert `entries` in its
/// place. Rows from other sources (manual overrides) are untouched unless
/// an entry has the same identity, in which case the manual row wins.
pub fn replace_glpi_users(
    conn: &mut Connection,
    source: &str,
    entries: &[(String, u64)],
) -> Result<usize, rusqlite::Error> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM glpi_users WHERE source = ?1", params![source])?;
    let mut written = 0;
    {
        let mut insert = tx.prepare(
            "INSERT OR IGNORE INTO glpi_users (identity, glpi_user_id, source, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
        )?;
        for (identity, id) in entries {
            written += insert.execute(params![identity, *id as i64, source])?;
        }
    }
    tx.commit()?;
    Ok(written)
}

pub fn list_glpi_users(conn: &Connection) -> Result<Vec<GlpiUserRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT identity, glpi_user_id, source, updated_at FROM glpi_users ORDER BY identity",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(GlpiUserRow {
            identity: row.get(0)?,
            glpi_user_id: row.get::<_, i64>(1)? as u64,
            source: row.get(2)?,
            updated_at: row.get(3)?,
        })
    })?;
    rows.collect()
}

pub fn load_identity_entries(conn: &Connection) -> Result<Vec<(String, u64)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT identity, glpi_user_id FROM glpi_users")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?;
    rows.collect()
}

pub fn count_glpi_users(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM glpi_users", [], |row| row.get(0))?;
    Ok(n as u64)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync runs ──────────────────────────────────────────────────────

pub fn insert_sync_run(conn: &Connection, pass: &str, dry_run: bool) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (pass, status, dry_run, started_at)
         VALUES (?1, 'running', ?2, datetime('now'))",
        params![pass, dry_run],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_sync_run(conn: &Connection, run_id: i64, report: &SyncReport) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_runs SET
            status = ?2, completed_at = datetime('now'),
            items_seen = ?3, created = ?4, updated = ?5,
            skipped = ?6, deleted = ?7, failed = ?8,
            error_message = ?9
         WHERE id = ?1",
        params![
            run_id,
            report.status.as_str(),
            report.items_seen as i64,
            report.created as i64,
            report.updated as i64,
            report.skipped as i64,
            report.deleted as i64,
            report.failed as i64,
            report.error,
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunRow {
    pub id: i64,
    pub pass: String,
    pub status: String,
    pub dry_run: bool,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub failed: u64,
    pub error_message: Option<String>,
}

pub fn recent_sync_runs(conn: &Connection, limit: usize) -> Result<Vec<SyncRunRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, pass, status, dry_run, started_at, completed_at,
                created, updated, skipped, deleted, failed, error_message
         FROM sync_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(SyncRunRow {
            id: row.get(0)?,
            pass: row.get(1)?,
            status: row.get(2)?,
            dry_run: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            created: row.get::<_, i64>(6)? as u64,
            updated: row.get::<_, i64>(7)? as u64,
            skipped: row.get::<_, i64>(8)? as u64,
            deleted: row.get::<_, i64>(9)? as u64,
            failed: row.get::<_, i64>(10)? as u64,
            error_message: row.get(11)?,
        })
    })?;
    rows.collect()
}
