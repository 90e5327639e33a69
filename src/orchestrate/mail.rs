// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inter-agent mailbox.
//!
//! Messages live in `.flotilla/mail.db`. The spawn flow writes a dispatch
//! message before the agent's terminal is started; the agent's startup hook
//! then reads it with `flotilla mail check`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{conversion_error, millis_column, open_connection, to_millis, STATE_DIR};

pub const MAIL_DB: &str = "mail.db";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailType {
    /// Assignment sent to a newly spawned agent.
    Dispatch,
    Status,
    Question,
    Result,
    Escalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailPriority {
    Low,
    Normal,
    High,
    Urgent,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

string_enum!(MailType {
    Dispatch => "dispatch",
    Status => "status",
    Question => "question",
    Result => "result",
    Escalation => "escalation",
});

string_enum!(MailPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

/// A message to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub kind: MailType,
    pub priority: MailPriority,
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: MailType,
    pub priority: MailPriority,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Enqueue a message and return its id.
    async fn send(&self, mail: NewMail) -> Result<i64, MailError>;

    /// Withdraw a message that has not been read yet. Returns whether it was removed.
    async fn retract(&self, id: i64) -> Result<bool, MailError>;
}

/// SQLite-backed mailbox.
pub struct SqliteMailbox {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteMailbox {
    pub fn open(project_root: &Path) -> Result<Self, MailError> {
        Self::open_at(&project_root.join(STATE_DIR).join(MAIL_DB))
    }

    pub fn open_at(db_path: &Path) -> Result<Self, MailError> {
        let conn = open_connection(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient, read);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path.to_path_buf(),
        })
    }

    /// Unread messages for an agent, highest priority first, optionally
    /// marking them read.
    pub async fn unread_for(
        &self,
        agent: &str,
        mark_read: bool,
    ) -> Result<Vec<MailMessage>, MailError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut messages = {
            let mut stmt = tx.prepare(
                "SELECT id, sender, recipient, subject, body, kind, priority, created_at, read
                 FROM messages WHERE recipient = ? AND read = 0 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![agent], map_message)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        if mark_read && !messages.is_empty() {
            tx.execute(
                "UPDATE messages SET read = 1 WHERE recipient = ? AND read = 0",
                params![agent],
            )?;
        }
        tx.commit()?;

        // Stable: equal priorities keep arrival order
        messages.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(messages)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Mailbox for SqliteMailbox {
    async fn send(&self, mail: NewMail) -> Result<i64, MailError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (sender, recipient, subject, body, kind, priority, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                mail.from,
                mail.to,
                mail.subject,
                mail.body,
                mail.kind.as_str(),
                mail.priority.as_str(),
                to_millis(&Utc::now()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, to = %mail.to, kind = %mail.kind, "Queued mail");
        Ok(id)
    }

    async fn retract(&self, id: i64) -> Result<bool, MailError> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM messages WHERE id = ? AND read = 0", params![id])?;
        Ok(removed > 0)
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MailMessage> {
    let kind: String = row.get(5)?;
    let priority: String = row.get(6)?;
    Ok(MailMessage {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        kind: kind.parse().map_err(|e| conversion_error(5, e))?,
        priority: priority.parse().map_err(|e| conversion_error(6, e))?,
        created_at: millis_column(row, 7)?,
        read: row.get(8)?,
    })
}
