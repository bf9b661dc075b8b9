use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::execution::{ExecutionApiResponse, ExecutionRecord, ExecutionStatus};
use weft_core::traits::{AgentStore, ExecutionStore};
use weft_core::workflow::{Agent, Workflow};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        workflow TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_agents_user ON agents(user_id);

    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        input TEXT NOT NULL,
        response TEXT,
        started_at TEXT NOT NULL,
        completed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_executions_agent
        ON executions(agent_id, started_at);";

fn db_err(e: impl std::fmt::Display) -> WeftError {
    WeftError::Database(e.to_string())
}

/// SQLite-backed agent and execution store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }

    /// Agents owned by `user_id`, by name.
    pub fn list_agents(&self, user_id: &str) -> Result<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, description, workflow FROM agents
                 WHERE user_id = ?1
                 ORDER BY name ASC",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![user_id], agent_row).map_err(db_err)?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(decode_agent(row.map_err(db_err)?)?);
        }
        Ok(agents)
    }

    /// Remove an agent and its execution history. Returns whether it existed.
    pub fn delete_agent(&self, agent_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM agents WHERE id = ?1 AND user_id = ?2",
                params![agent_id, user_id],
            )
            .map_err(db_err)?;
        if deleted > 0 {
            conn.execute("DELETE FROM executions WHERE agent_id = ?1", params![agent_id])
                .map_err(db_err)?;
        }
        Ok(deleted > 0)
    }

    /// Most recent executions of an agent, newest first.
    pub fn list_executions(&self, agent_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, user_id, status, input, response, started_at, completed_at
                 FROM executions
                 WHERE agent_id = ?1
                 ORDER BY started_at DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![agent_id, limit as i64], execution_row)
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(decode_execution(row.map_err(db_err)?)?);
        }
        Ok(records)
    }

    fn upsert_agent(&self, mut agent: Agent) -> Result<Agent> {
        let conn = self.lock()?;
        let stored: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT user_id, workflow FROM agents WHERE id = ?1",
                params![agent.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let previous = match stored {
            Some((owner, _)) if owner != agent.user_id => {
                return Err(WeftError::Validation(format!(
                    "agent {} belongs to another user",
                    agent.id
                )));
            }
            Some((_, Some(json))) => Some(serde_json::from_str::<Workflow>(&json)?),
            _ => None,
        };

        if let Some(workflow) = agent.workflow.as_mut() {
            workflow.version = match &previous {
                Some(old) if workflow.structure_differs(old) => old.version + 1,
                Some(old) => old.version,
                None => workflow.version.max(1),
            };
        }

        let workflow_json = agent.workflow.as_ref().map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO agents (id, user_id, name, description, workflow, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                workflow = excluded.workflow,
                updated_at = excluded.updated_at",
            params![agent.id, agent.user_id, agent.name, agent.description, workflow_json, now],
        )
        .map_err(db_err)?;

        info!(
            agent_id = %agent.id,
            version = agent.workflow.as_ref().map(|w| w.version).unwrap_or(0),
            "Agent saved"
        );
        Ok(agent)
    }
}

type AgentRow = (String, String, String, String, Option<String>);

fn agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_agent((id, user_id, name, description, workflow): AgentRow) -> Result<Agent> {
    let workflow = workflow.map(|json| serde_json::from_str(&json)).transpose()?;
    Ok(Agent {
        id,
        user_id,
        name,
        description,
        workflow,
    })
}

type ExecutionRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
);

fn execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_time(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn decode_execution(row: ExecutionRow) -> Result<ExecutionRecord> {
    let (id, agent_id, user_id, status, input, response, started_at, completed_at) = row;
    let status: ExecutionStatus = serde_json::from_value(Value::String(status))?;
    let input: Map<String, Value> = serde_json::from_str(&input)?;
    let response = response
        .map(|json| serde_json::from_str::<ExecutionApiResponse>(&json))
        .transpose()?;

    Ok(ExecutionRecord {
        id,
        agent_id,
        user_id,
        status,
        input,
        started_at: parse_time(&started_at),
        completed_at: completed_at.as_deref().map(parse_time),
        response,
    })
}

impl AgentStore for SqliteStore {
    fn get_agent<'a>(&'a self, agent_id: &'a str, user_id: &'a str) -> BoxFuture<'a, Result<Agent>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    "SELECT id, user_id, name, description, workflow FROM agents
                     WHERE id = ?1 AND user_id = ?2",
                    params![agent_id, user_id],
                    agent_row,
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| WeftError::AgentNotFound(agent_id.to_string()))?;
            decode_agent(row)
        })
    }

    fn save_agent(&self, agent: Agent) -> BoxFuture<'_, Result<Agent>> {
        Box::pin(async move { self.upsert_agent(agent) })
    }
}

impl ExecutionStore for SqliteStore {
    fn create_execution<'a>(
        &'a self,
        agent_id: &'a str,
        user_id: &'a str,
        input: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<ExecutionRecord>> {
        Box::pin(async move {
            let record = ExecutionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                agent_id: agent_id.to_string(),
                user_id: user_id.to_string(),
                status: ExecutionStatus::Running,
                input: weft_core::strip_reserved(input),
                started_at: Utc::now(),
                completed_at: None,
                response: None,
            };
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO executions (id, agent_id, user_id, status, input, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.agent_id,
                    record.user_id,
                    record.status.as_str(),
                    serde_json::to_string(&record.input)?,
                    record.started_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(record)
        })
    }

    fn complete_execution<'a>(
        &'a self,
        execution_id: &'a str,
        response: &'a ExecutionApiResponse,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let json = serde_json::to_string(response)?;
            let conn = self.lock()?;
            let updated = conn
                .execute(
                    "UPDATE executions SET status = ?2, response = ?3, completed_at = ?4 WHERE id = ?1",
                    params![execution_id, response.status.as_str(), json, Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            if updated == 0 {
                return Err(db_err(format!("execution {} not found", execution_id)));
            }
            Ok(())
        })
    }

    fn get_execution<'a>(&'a self, execution_id: &'a str) -> BoxFuture<'a, Result<Option<ExecutionRecord>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    "SELECT id, agent_id, user_id, status, input, response, started_at, completed_at
                     FROM executions WHERE id = ?1",
                    params![execution_id],
                    execution_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(decode_execution).transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::execution::ExecutionMetadata;
    use weft_core::workflow::Connection as Edge;
    use weft_test_utils::{agent, llm_block, variable_read, workflow};

    fn pipeline() -> Workflow {
        workflow(
            vec![variable_read("Start", "text"), llm_block("Summarize", "{{Start.text}}")],
            vec![Edge::new("Start", "Summarize")],
        )
    }

    #[tokio::test]
    async fn save_and_get_agent() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_agent(agent("a1", "u1", Some(pipeline()))).await.unwrap();

        let loaded = store.get_agent("a1", "u1").await.unwrap();
        assert_eq!(loaded.name, "a1 agent");
        assert_eq!(loaded.workflow.unwrap(), pipeline());

        let err = store.get_agent("a1", "someone-else").await.unwrap_err();
        assert!(matches!(err, WeftError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn agent_without_workflow() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_agent(agent("a1", "u1", None)).await.unwrap();
        assert!(store.get_agent("a1", "u1").await.unwrap().workflow.is_none());
    }

    #[tokio::test]
    async fn version_bumps_only_on_structural_change() {
        let store = SqliteStore::in_memory().unwrap();
        let saved = store.save_agent(agent("a1", "u1", Some(pipeline()))).await.unwrap();
        assert_eq!(saved.workflow.as_ref().unwrap().version, 1);

        let mut renamed = agent("a1", "u1", Some(pipeline()));
        renamed.name = "Renamed".into();
        let saved = store.save_agent(renamed).await.unwrap();
        assert_eq!(saved.workflow.as_ref().unwrap().version, 1);

        let mut changed = pipeline();
        changed.blocks.push(variable_read("Extra", "x"));
        let saved = store.save_agent(agent("a1", "u1", Some(changed))).await.unwrap();
        assert_eq!(saved.workflow.as_ref().unwrap().version, 2);
        assert_eq!(store.get_agent("a1", "u1").await.unwrap().workflow.unwrap().version, 2);
    }

    #[tokio::test]
    async fn other_users_cannot_overwrite() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_agent(agent("a1", "u1", None)).await.unwrap();
        assert!(store.save_agent(agent("a1", "u2", None)).await.is_err());
    }

    #[tokio::test]
    async fn execution_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let input = json!({"text": "hello", "__user_id__": "u1"}).as_object().cloned().unwrap();
        let record = store.create_execution("a1", "u1", &input).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(!record.input.contains_key("__user_id__"));

        let response = ExecutionApiResponse {
            status: ExecutionStatus::Completed,
            result: "A greeting.".into(),
            artifacts: vec![],
            files: vec![],
            blocks: Default::default(),
            metadata: ExecutionMetadata {
                execution_id: record.id.clone(),
                ..ExecutionMetadata::default()
            },
            error: None,
        };
        store.complete_execution(&record.id, &response).await.unwrap();

        let loaded = store.get_execution(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.response.unwrap().result, "A greeting.");
        assert_eq!(store.list_executions("a1", 10).unwrap().len(), 1);

        assert!(store.get_execution("missing").await.unwrap().is_none());
        assert!(store.complete_execution("missing", &response).await.is_err());
    }

    #[tokio::test]
    async fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weft.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_agent(agent("a1", "u1", Some(pipeline()))).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_agents("u1").unwrap().len(), 1);
        assert!(store.delete_agent("a1", "u1").unwrap());
        assert!(store.list_agents("u1").unwrap().is_empty());
    }
}
