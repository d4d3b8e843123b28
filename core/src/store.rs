//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! The engine calls store methods; nothing else executes SQL.

use rusqlite::{params, Connection, OptionalExtension};
use crate::{
    error::SimResult,
    event::EventLogEntry,
    negotiation::{NegotiationSession, SessionStatus},
    snapshot::{TerritoryDocument, TerritorySnapshot},
    types::Month,
};

pub struct SimStore {
    conn: Connection,
}

impl SimStore {
    /// Open (or create) the run database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, month, territory, source, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.run_id,
                entry.month as i64,
                entry.territory,
                entry.source,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    /// Append a batch in one transaction.
    pub fn append_events(&mut self, entries: &[EventLogEntry]) -> SimResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO event_log (run_id, month, territory, source, event_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.run_id,
                    entry.month as i64,
                    entry.territory,
                    entry.source,
                    entry.event_type,
                    entry.payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn events_for_month(&self, run_id: &str, month: Month) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, month, territory, source, event_type, payload
             FROM event_log WHERE run_id = ?1 AND month = ?2
             ORDER BY id ASC"
        )?;
        let entries = stmt.query_map(params![run_id, month as i64], |row| {
            Ok(EventLogEntry {
                id:         Some(row.get(0)?),
                run_id:     row.get(1)?,
                month:      row.get::<_, i64>(2)? as Month,
                territory:  row.get(3)?,
                source:     row.get(4)?,
                event_type: row.get(5)?,
                payload:    row.get(6)?,
            })
        })?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Snapshot ───────────────────────────────────────────────

    pub fn save_snapshot(&self, run_id: &str, snapshot: &TerritorySnapshot) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO snapshot (run_id, territory, month, schema_version, state_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                snapshot.territory,
                snapshot.month as i64,
                snapshot.document.schema_version as i64,
                snapshot.document.to_json()?,
            ],
        )?;
        Ok(())
    }

    /// Most recent snapshot of `territory` at or before `month`.
    pub fn latest_snapshot_before(
        &self, run_id: &str, territory: &str, month: Month
    ) -> SimResult<Option<TerritorySnapshot>> {
        let row = self.conn.query_row(
            "SELECT month, state_json FROM snapshot
             WHERE run_id = ?1 AND territory = ?2 AND month <= ?3
             ORDER BY month DESC LIMIT 1",
            params![run_id, territory, month as i64],
            |row| Ok((row.get::<_, i64>(0)? as Month, row.get::<_, String>(1)?)),
        ).optional()?;
        match row {
            Some((month, json)) => Ok(Some(TerritorySnapshot {
                territory: territory.to_string(),
                month,
                document: TerritoryDocument::from_json(&json)?,
            })),
            None => Ok(None),
        }
    }

    // ── Negotiation sessions ───────────────────────────────────

    pub fn upsert_session(&self, run_id: &str, session: &NegotiationSession) -> SimResult<()> {
        let status = match session.status {
            SessionStatus::Active => "active",
            SessionStatus::Resolved => "resolved",
        };
        self.conn.execute(
            "INSERT INTO negotiation_session
                (session_id, run_id, territory, counterpart, event_type, status,
                 current_round, session_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                current_round = excluded.current_round,
                session_json = excluded.session_json,
                updated_at = excluded.updated_at",
            params![
                session.id,
                run_id,
                session.territory,
                session.counterpart,
                serde_json::to_string(&session.event_type)?,
                status,
                session.current_round as i64,
                serde_json::to_string(session)?,
                session.created_at.to_rfc3339(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_sessions(&self, run_id: &str) -> SimResult<Vec<NegotiationSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_json FROM negotiation_session
             WHERE run_id = ?1 ORDER BY created_at ASC, session_id ASC"
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| Ok(serde_json::from_str(json)?))
            .collect()
    }

    pub fn active_session_count(&self, run_id: &str) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM negotiation_session WHERE run_id = ?1 AND status = 'active'",
            params![run_id],
            |row| row.get(0),
        )?)
    }
}
