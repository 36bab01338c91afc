//! Diesel-based session repository for SQLite.
//!
//! Persists whole-session snapshots: one session row plus all of its tab
//! rows, written inside a single transaction so concurrent saves of the
//! same session id serialize to last-writer-wins with no partial mixes.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl, SimpleAsyncConnection};
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{NewSession, NewTab, SessionRecord, TabRecord};
use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use crate::models::{Session, Tab};
use crate::schema::{sessions, tabs};

/// Errors surfaced by the session repository.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("cannot open session database: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

/// One row of `list_sessions` output.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: Session,
    pub tab_count: usize,
}

/// Diesel-based session repository with compile-time query checking.
#[derive(Clone)]
pub struct SessionRepository {
    pool: AsyncSqlitePool,
}

impl SessionRepository {
    /// Create a new session repository.
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist yet.
    pub async fn init_schema(&self) -> Result<(), SessionStoreError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(include_str!("schema_sqlite.sql")).await?;
        Ok(())
    }

    /// Persist a whole-session snapshot.
    ///
    /// Replaces the session row and rewrites its tab set in one
    /// transaction. Tabs belonging to other sessions are untouched.
    pub async fn save(&self, session: &Session, tab_list: &[Tab]) -> Result<(), SessionStoreError> {
        let mut conn = self.pool.get().await?;

        let data = serde_json::to_string(&session.data).unwrap_or_else(|_| "{}".to_string());
        let created_at = session.created_at.to_rfc3339();
        let last_accessed = session.last_accessed.to_rfc3339();

        let session_row = NewSession {
            id: &session.id,
            name: &session.name,
            persona_id: &session.persona_id,
            created_at: &created_at,
            last_accessed: &last_accessed,
            data: &data,
        };

        struct TabStrings {
            created_at: String,
            last_accessed: String,
            history: String,
        }
        let tab_strings: Vec<TabStrings> = tab_list
            .iter()
            .map(|tab| TabStrings {
                created_at: tab.created_at.to_rfc3339(),
                last_accessed: tab.last_accessed.to_rfc3339(),
                history: serde_json::to_string(&tab.history)
                    .unwrap_or_else(|_| "[]".to_string()),
            })
            .collect();
        let tab_rows: Vec<NewTab> = tab_list
            .iter()
            .zip(tab_strings.iter())
            .map(|(tab, strings)| NewTab {
                id: &tab.id,
                session_id: &tab.session_id,
                url: &tab.url,
                title: &tab.title,
                persona_id: &tab.persona_id,
                created_at: &strings.created_at,
                last_accessed: &strings.last_accessed,
                history: &strings.history,
                scroll_position: tab.scroll_position,
                zoom_factor: tab.zoom_factor,
            })
            .collect();

        let session_id = session.id.clone();
        conn.transaction(|conn| {
            Box::pin(async move {
                diesel::replace_into(sessions::table)
                    .values(&session_row)
                    .execute(conn)
                    .await?;

                diesel::delete(tabs::table.filter(tabs::session_id.eq(&session_id)))
                    .execute(conn)
                    .await?;

                for row in &tab_rows {
                    diesel::insert_into(tabs::table)
                        .values(row)
                        .execute(conn)
                        .await?;
                }

                Ok::<(), DieselError>(())
            })
        })
        .await?;

        debug!(
            session_id = %session.id,
            tabs = tab_list.len(),
            "saved session snapshot"
        );
        Ok(())
    }

    /// Load a session and its tabs, oldest tab first.
    pub async fn load(&self, session_id: &str) -> Result<(Session, Vec<Tab>), SessionStoreError> {
        let mut conn = self.pool.get().await?;

        let record = sessions::table
            .find(session_id)
            .first::<SessionRecord>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| SessionStoreError::NotFound(session_id.to_string()))?;

        let tab_records = tabs::table
            .filter(tabs::session_id.eq(session_id))
            .order((tabs::created_at.asc(), tabs::id.asc()))
            .load::<TabRecord>(&mut conn)
            .await?;

        let session = Self::session_record_to_model(record);
        let tab_list = tab_records
            .into_iter()
            .map(Self::tab_record_to_model)
            .collect();

        Ok((session, tab_list))
    }

    /// List every stored session, most recently accessed first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let mut conn = self.pool.get().await?;

        let records = sessions::table
            .order(sessions::last_accessed.desc())
            .load::<SessionRecord>(&mut conn)
            .await?;

        let tab_owners: Vec<String> = tabs::table
            .select(tabs::session_id)
            .load::<String>(&mut conn)
            .await?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for owner in tab_owners {
            *counts.entry(owner).or_insert(0) += 1;
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let tab_count = counts.get(&record.id).copied().unwrap_or(0);
                SessionSummary {
                    session: Self::session_record_to_model(record),
                    tab_count,
                }
            })
            .collect())
    }

    /// Delete a session and its tabs. Returns true if the session existed.
    pub async fn delete(&self, session_id: &str) -> Result<bool, SessionStoreError> {
        let mut conn = self.pool.get().await?;

        let removed = conn
            .transaction(|conn| {
                let session_id = session_id.to_string();
                Box::pin(async move {
                    diesel::delete(tabs::table.filter(tabs::session_id.eq(&session_id)))
                        .execute(conn)
                        .await?;

                    let rows = diesel::delete(sessions::table.find(&session_id))
                        .execute(conn)
                        .await?;

                    Ok::<bool, DieselError>(rows > 0)
                })
            })
            .await?;

        Ok(removed)
    }

    /// Remove every session and tab. Returns the number of sessions removed.
    pub async fn purge_all(&self) -> Result<usize, SessionStoreError> {
        let mut conn = self.pool.get().await?;

        let removed = conn
            .transaction(|conn| {
                Box::pin(async move {
                    diesel::delete(tabs::table).execute(conn).await?;
                    let rows = diesel::delete(sessions::table).execute(conn).await?;
                    Ok::<usize, DieselError>(rows)
                })
            })
            .await?;

        debug!(sessions = removed, "purged session store");
        Ok(removed)
    }

    /// Delete sessions not accessed within the last `days` days.
    ///
    /// Returns the number of sessions removed. RFC 3339 timestamps with a
    /// fixed UTC offset compare correctly as strings.
    pub async fn cleanup_older_than(&self, days: i64) -> Result<usize, SessionStoreError> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let mut conn = self.pool.get().await?;

        let stale: Vec<String> = sessions::table
            .filter(sessions::last_accessed.lt(&cutoff))
            .select(sessions::id)
            .load::<String>(&mut conn)
            .await?;

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = conn
            .transaction(|conn| {
                let stale = stale.clone();
                Box::pin(async move {
                    diesel::delete(tabs::table.filter(tabs::session_id.eq_any(&stale)))
                        .execute(conn)
                        .await?;

                    let rows = diesel::delete(
                        sessions::table.filter(sessions::id.eq_any(&stale)),
                    )
                    .execute(conn)
                    .await?;

                    Ok::<usize, DieselError>(rows)
                })
            })
            .await?;

        debug!(sessions = removed, days, "cleaned up stale sessions");
        Ok(removed)
    }

    /// Blank the navigation history of every saved tab, keeping the tabs
    /// themselves. Returns the number of tabs touched.
    pub async fn clear_histories(&self) -> Result<usize, SessionStoreError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(tabs::table)
            .set(tabs::history.eq("[]"))
            .execute(&mut conn)
            .await?;

        debug!(tabs = rows, "cleared saved tab histories");
        Ok(rows)
    }

    fn session_record_to_model(record: SessionRecord) -> Session {
        let data = serde_json::from_str(&record.data).unwrap_or_else(|e| {
            warn!(session_id = %record.id, error = %e, "corrupt session data, using empty object");
            serde_json::Value::Object(Default::default())
        });
        Session {
            id: record.id,
            name: record.name,
            persona_id: record.persona_id,
            created_at: parse_datetime(&record.created_at),
            last_accessed: parse_datetime(&record.last_accessed),
            data,
        }
    }

    fn tab_record_to_model(record: TabRecord) -> Tab {
        let history: Vec<String> = serde_json::from_str(&record.history).unwrap_or_else(|e| {
            warn!(tab_id = %record.id, error = %e, "corrupt tab history, using empty history");
            Vec::new()
        });
        Tab {
            id: record.id,
            session_id: record.session_id,
            url: record.url,
            title: record.title,
            persona_id: record.persona_id,
            created_at: parse_datetime(&record.created_at),
            last_accessed: parse_datetime(&record.last_accessed),
            history,
            scroll_position: record.scroll_position,
            zoom_factor: record.zoom_factor,
        }
    }
}
