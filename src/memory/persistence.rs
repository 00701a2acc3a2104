//! 对话持久化（SQLite）
//!
//! 按 project 作用域保存对话消息、产物（artifact）与项目里程碑。
//! 未配置 db_path 时不创建 store，上层的保存操作即为 no-op。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::memory::context::Artifact;
use crate::memory::{Message, Role};

/// 项目里程碑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub title: String,
    pub due_date: NaiveDate,
    pub done: bool,
}

/// SQLite 存储：单连接，Mutex 串行化访问
#[derive(Debug)]
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| PipelineError::StoreDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(Self::from_connection(Connection::open(path)?)?)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_tables(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project);
            CREATE TABLE IF NOT EXISTS artifacts (
                project TEXT NOT NULL,
                action TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (project, action)
            );
            CREATE TABLE IF NOT EXISTS milestones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                title TEXT NOT NULL,
                due_date TEXT NOT NULL,
                done INTEGER NOT NULL DEFAULT 0
            );",
        )
    }

    pub fn append_message(&self, project: &str, message: &Message) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO messages (project, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                project,
                message.role.as_str(),
                message.content,
                message.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// 按插入顺序加载项目的全部消息
    pub fn load_messages(&self, project: &str) -> rusqlite::Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp FROM messages WHERE project = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            let ts: String = row.get(2)?;
            Ok(Message {
                role: Role::parse(&role),
                content,
                timestamp: parse_timestamp(&ts),
            })
        })?;
        rows.collect()
    }

    pub fn clear_messages(&self, project: &str) -> rusqlite::Result<usize> {
        self.conn()
            .execute("DELETE FROM messages WHERE project = ?1", params![project])
    }

    /// 同一 project 下同名 action 覆盖旧值
    pub fn save_artifact(
        &self,
        project: &str,
        action: &str,
        artifact: &Artifact,
    ) -> rusqlite::Result<()> {
        let value = artifact.value.to_string();
        self.conn().execute(
            "INSERT INTO artifacts (project, action, value, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project, action) DO UPDATE SET value = excluded.value, created_at = excluded.created_at",
            params![project, action, value, artifact.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_artifacts(&self, project: &str) -> rusqlite::Result<BTreeMap<String, Artifact>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT action, value, created_at FROM artifacts WHERE project = ?1")?;
        let rows = stmt.query_map(params![project], |row| {
            let action: String = row.get(0)?;
            let value: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            Ok((action, value, created_at))
        })?;

        let mut artifacts = BTreeMap::new();
        for row in rows {
            let (action, value, created_at) = row?;
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            artifacts.insert(
                action,
                Artifact {
                    value,
                    created_at: parse_timestamp(&created_at),
                },
            );
        }
        Ok(artifacts)
    }

    pub fn clear_artifacts(&self, project: &str) -> rusqlite::Result<usize> {
        self.conn()
            .execute("DELETE FROM artifacts WHERE project = ?1", params![project])
    }

    pub fn add_milestone(
        &self,
        project: &str,
        title: &str,
        due_date: NaiveDate,
    ) -> rusqlite::Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO milestones (project, title, due_date) VALUES (?1, ?2, ?3)",
            params![project, title, due_date.format("%Y-%m-%d").to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按截止日期升序
    pub fn list_milestones(&self, project: &str) -> rusqlite::Result<Vec<Milestone>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, due_date, done FROM milestones WHERE project = ?1 ORDER BY due_date ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            let due: String = row.get(2)?;
            let due_date = NaiveDate::parse_from_str(&due, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(Milestone {
                id: row.get(0)?,
                title: row.get(1)?,
                due_date,
                done: row.get::<_, i64>(3)? != 0,
            })
        })?;
        rows.collect()
    }

}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
