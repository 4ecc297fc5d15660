//! SQLite sink for WARN-and-above log records.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A persisted log record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub conversation_id: Option<String>,
}

/// Query parameters for searching persisted logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub conversation_id: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 conversation_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_conversation ON logs(conversation_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.conversation_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, conversation_id \
             FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.clone()));
        }
        if let Some(target) = &q.target {
            sql.push_str(&format!(" AND target LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%{target}%")));
        }
        if let Some(conversation_id) = &q.conversation_id {
            sql.push_str(&format!(" AND conversation_id = ?{}", params.len() + 1));
            params.push(Box::new(conversation_id.clone()));
        }
        sql.push_str(" ORDER BY id DESC");
        sql.push_str(&format!(" LIMIT {}", q.limit.unwrap_or(100)));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                conversation_id: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    conversation_id: Option<String>,
}

/// tracing layer that writes warn+ events into the sink.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    conversation_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            conversation_id: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(rendered),
            "conversation_id" => {
                self.conversation_id = Some(rendered.trim_matches('"').to_owned());
            }
            name => {
                self.fields
                    .insert(name.to_owned(), serde_json::Value::String(rendered));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_owned()),
            "conversation_id" => self.conversation_id = Some(value.to_owned()),
            name => {
                self.fields
                    .insert(name.to_owned(), serde_json::Value::String(value.to_owned()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_owned(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_owned(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_owned(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_owned(),
            message: visitor.message.unwrap_or_default(),
            fields,
            conversation_id: visitor.conversation_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("codeact-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("logs.db")
    }

    fn insert(sink: &SqliteLogSink, level: &str, message: &str, conversation: Option<&str>) {
        sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.into(),
            target: "codeact_runtime::dispatcher".into(),
            message: message.into(),
            fields: None,
            conversation_id: conversation.map(str::to_owned),
        });
    }

    #[test]
    fn create_and_count() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        insert(&sink, "WARN", "sandbox call failed", Some("conv_1"));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn query_by_level() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        insert(&sink, "WARN", "warning", None);
        insert(&sink, "ERROR", "broken", None);

        let results = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "broken");
    }

    #[test]
    fn query_by_conversation() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        insert(&sink, "WARN", "a", Some("conv_a"));
        insert(&sink, "WARN", "b", Some("conv_b"));

        let results = sink
            .query(&LogQuery {
                conversation_id: Some("conv_a".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "a");
    }

    #[test]
    fn query_newest_first_with_limit() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        for i in 0..10 {
            insert(&sink, "WARN", &format!("msg {i}"), None);
        }
        let results = sink
            .query(&LogQuery {
                limit: Some(3),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].message, "msg 9");
    }

    #[test]
    fn query_by_target_fragment() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        insert(&sink, "WARN", "dispatcher msg", None);
        let results = sink
            .query(&LogQuery {
                target: Some("dispatcher".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
