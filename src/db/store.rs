//! SQLite-backed service store.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Thread-safe store for services and their check history.
///
/// Mutations are single-record and atomic; each use case touches only the
/// columns it owns (user edit vs. check-result update vs. position swap), so
/// concurrent writers to the same service cannot clobber each other's fields.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    live: Arc<watch::Sender<Vec<Service>>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let (live, _) = watch::channel(Vec::new());
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            live: Arc::new(live),
        };
        store.init()?;
        store.publish();
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// A live view of the full service list, republished after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Service>> {
        self.live.subscribe()
    }

    fn publish(&self) {
        match self.get_all() {
            Ok(services) => {
                self.live.send_replace(services);
            }
            // Watchers keep the previous list; the mutation itself already
            // succeeded.
            Err(e) => tracing::warn!("Failed to refresh live service list: {}", e),
        }
    }

    // --- Service CRUD ---

    /// Insert a new service and return its id.
    ///
    /// The interval is clamped to at least 1 minute. A zero position gets the
    /// next free slot at the end of the list; explicit positions (imports)
    /// are kept as-is.
    pub fn insert_service(&self, service: &mut Service) -> Result<i64, DbError> {
        if service.interval < 1 {
            service.interval = 1;
        }
        let id = {
            let conn = self.conn.lock().unwrap();
            if service.position == 0 {
                let max: i64 =
                    conn.query_row("SELECT COALESCE(MAX(position), 0) FROM services", [], |r| {
                        r.get(0)
                    })?;
                service.position = max + 1;
            }
            conn.execute(
                "INSERT INTO services (name, url, interval, headers, method, body,
                    response_pattern, use_regex_pattern, sha1_certificate, status,
                    last_checked, last_successful_check, archived, position, group_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    service.name,
                    service.url,
                    service.interval,
                    service.headers,
                    service.method,
                    service.body,
                    service.response_pattern,
                    service.use_regex_pattern,
                    service.sha1_certificate,
                    service.status,
                    service.last_checked,
                    service.last_successful_check,
                    service.archived,
                    service.position,
                    service.group_name,
                ],
            )?;
            conn.last_insert_rowid()
        };
        service.id = id;
        self.publish();
        Ok(id)
    }

    /// Update the user-editable fields of a service.
    ///
    /// Status, timestamps, archive flag and position are owned by other
    /// operations and deliberately left untouched here.
    pub fn update_service(&self, service: &Service) -> Result<(), DbError> {
        let interval = if service.interval < 1 { 1 } else { service.interval };
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE services SET name=?1, url=?2, interval=?3, headers=?4, method=?5,
                    body=?6, response_pattern=?7, use_regex_pattern=?8, sha1_certificate=?9,
                    group_name=?10
                 WHERE id=?11",
                params![
                    service.name,
                    service.url,
                    interval,
                    service.headers,
                    service.method,
                    service.body,
                    service.response_pattern,
                    service.use_regex_pattern,
                    service.sha1_certificate,
                    service.group_name,
                    service.id,
                ],
            )?;
        }
        self.publish();
        Ok(())
    }

    /// Get all services ordered by position.
    pub fn get_all(&self) -> Result<Vec<Service>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM services ORDER BY position ASC",
            SERVICE_COLUMNS
        ))?;
        let services = stmt
            .query_map([], row_to_service)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(services)
    }

    /// Get all non-archived services ordered by position.
    pub fn get_active(&self) -> Result<Vec<Service>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM services WHERE archived = 0 ORDER BY position ASC",
            SERVICE_COLUMNS
        ))?;
        let services = stmt
            .query_map([], row_to_service)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(services)
    }

    /// Get a service by id, or `None` if it has been deleted.
    pub fn get_by_id(&self, id: i64) -> Result<Option<Service>, DbError> {
        let conn = self.conn.lock().unwrap();
        let service = conn
            .query_row(
                &format!("SELECT {} FROM services WHERE id = ?1", SERVICE_COLUMNS),
                params![id],
                row_to_service,
            )
            .optional()?;
        Ok(service)
    }

    /// Delete a service. History records are kept; they snapshot the name.
    pub fn delete_service(&self, id: i64) -> Result<(), DbError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM services WHERE id = ?1", params![id])?;
        }
        self.publish();
        Ok(())
    }

    /// Delete every service.
    pub fn delete_all(&self) -> Result<(), DbError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM services", [])?;
        }
        self.publish();
        Ok(())
    }

    /// Set or clear the archived flag for a service.
    pub fn set_archived(&self, id: i64, archived: bool) -> Result<(), DbError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE services SET archived = ?1 WHERE id = ?2",
                params![archived, id],
            )?;
        }
        self.publish();
        Ok(())
    }

    /// Assign positions to two services in a single transaction.
    pub fn swap_positions(
        &self,
        id_a: i64,
        pos_a: i64,
        id_b: i64,
        pos_b: i64,
    ) -> Result<(), DbError> {
        {
            let conn = self.conn.lock().unwrap();
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE services SET position = ?1 WHERE id = ?2",
                params![pos_a, id_a],
            )?;
            tx.execute(
                "UPDATE services SET position = ?1 WHERE id = ?2",
                params![pos_b, id_b],
            )?;
            tx.commit()?;
        }
        self.publish();
        Ok(())
    }

    /// Move a service one slot up in the active list by swapping positions
    /// with its nearest lower-position neighbor. A service already at the top
    /// is left alone; returns whether a swap happened.
    pub fn move_up(&self, id: i64) -> Result<bool, DbError> {
        let swapped = {
            let conn = self.conn.lock().unwrap();
            let position: Option<i64> = conn
                .query_row(
                    "SELECT position FROM services WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            let position = match position {
                Some(p) => p,
                None => return Ok(false),
            };
            let neighbor: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT id, position FROM services
                     WHERE archived = 0 AND position < ?1
                     ORDER BY position DESC LIMIT 1",
                    params![position],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match neighbor {
                Some((other_id, other_pos)) => {
                    let tx = conn.unchecked_transaction()?;
                    tx.execute(
                        "UPDATE services SET position = ?1 WHERE id = ?2",
                        params![other_pos, id],
                    )?;
                    tx.execute(
                        "UPDATE services SET position = ?1 WHERE id = ?2",
                        params![position, other_id],
                    )?;
                    tx.commit()?;
                    true
                }
                None => false,
            }
        };
        if swapped {
            self.publish();
        }
        Ok(swapped)
    }

    /// Record the outcome of a completed check.
    ///
    /// Touches only the status columns; `last_successful_check` advances only
    /// when the status is `"ok"`, so it is monotonically non-decreasing.
    pub fn apply_check_result(&self, id: i64, status: &str, now: i64) -> Result<(), DbError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE services SET status = ?1, last_checked = ?2,
                    last_successful_check = CASE WHEN ?1 = 'ok' THEN ?2
                                                 ELSE last_successful_check END
                 WHERE id = ?3",
                params![status, now, id],
            )?;
        }
        self.publish();
        Ok(())
    }

    // --- Check history ---

    /// Append a history record for a completed check.
    pub fn append_history(&self, record: &CheckHistoryRecord) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO check_history (service_name, timestamp, status) VALUES (?1, ?2, ?3)",
            params![record.service_name, record.timestamp, record.status],
        )?;
        Ok(())
    }

    /// Get history records, newest first.
    pub fn get_history(&self, offset: i64, limit: i64) -> Result<Vec<CheckHistoryRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, service_name, timestamp, status FROM check_history
             ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2",
        )?;
        let records = stmt
            .query_map(params![limit, offset], |row| {
                Ok(CheckHistoryRecord {
                    id: row.get(0)?,
                    service_name: row.get(1)?,
                    timestamp: row.get(2)?,
                    status: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }
}

const SERVICE_COLUMNS: &str = "id, name, url, interval, headers, method, body, \
    response_pattern, use_regex_pattern, sha1_certificate, status, last_checked, \
    last_successful_check, archived, position, group_name";

fn row_to_service(row: &rusqlite::Row<'_>) -> SqlResult<Service> {
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        interval: row.get(3)?,
        headers: row.get(4)?,
        method: row.get(5)?,
        body: row.get(6)?,
        response_pattern: row.get(7)?,
        use_regex_pattern: row.get(8)?,
        sha1_certificate: row.get(9)?,
        status: row.get(10)?,
        last_checked: row.get(11)?,
        last_successful_check: row.get(12)?,
        archived: row.get(13)?,
        position: row.get(14)?,
        group_name: row.get(15)?,
    })
}
