use crate::errors::{AppError, AppResult};
use crate::models::{
    AiLogEntry, DateKey, Goal, GoalPatch, OneOnOneItem, OneOnOnePatch, Person, PersonPatch, PromptLog,
    RemoteSnapshot, Task, TaskCategory, TaskPatch, TaskPriority, TaskStatus,
};
use crate::sync::{Change, RemoteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite-compatible mirror of the planner entities plus the AI log tables.
/// Clones share one connection.
#[derive(Debug, Clone)]
pub struct SqlMirror {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqlMirror {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let mirror = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };
        mirror.ensure_schema_extensions()?;
        Ok(mirror)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Applies one change synchronously. Exactly one statement per change.
    pub fn apply_change(&self, change: &Change) -> AppResult<()> {
        let conn = self.lock()?;
        let synced_at = Utc::now().to_rfc3339();
        match change {
            Change::InsertTask(task) => insert_task(&conn, task, &synced_at),
            Change::UpdateTask { id, patch } => {
                update_row(&conn, "tasks", id, task_assignments(patch), &synced_at)
            }
            Change::DeleteTask { id } => delete_row(&conn, "tasks", id),
            Change::InsertGoal(goal) => insert_goal(&conn, goal, &synced_at),
            Change::UpdateGoal {
                id,
                patch,
                updated_at,
            } => update_row(
                &conn,
                "goals",
                id,
                goal_assignments(patch, *updated_at),
                &synced_at,
            ),
            Change::DeleteGoal { id } => delete_row(&conn, "goals", id),
            Change::InsertPerson(person) => insert_person(&conn, person, &synced_at),
            Change::UpdatePerson { id, patch } => update_row(
                &conn,
                "one_on_one_people",
                id,
                person_assignments(patch),
                &synced_at,
            ),
            Change::DeletePerson { id } => delete_row(&conn, "one_on_one_people", id),
            Change::InsertOneOnOne(item) => insert_one_on_one(&conn, item, &synced_at),
            Change::UpdateOneOnOne { id, patch } => update_row(
                &conn,
                "one_on_ones",
                id,
                one_on_one_assignments(patch),
                &synced_at,
            ),
            Change::DeleteOneOnOne { id } => delete_row(&conn, "one_on_ones", id),
            Change::InsertPrompt(prompt) => insert_prompt(&conn, prompt, &synced_at),
            Change::InsertAiLog(entry) => insert_ai_log(&conn, entry, &synced_at),
        }
    }

    /// Everything needed to hydrate the planner from the mirror.
    pub fn load_snapshot(&self) -> AppResult<RemoteSnapshot> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, content, date, status, priority, category, createdAt FROM tasks ORDER BY createdAt ASC",
        )?;
        let tasks = stmt
            .query_map([], parse_task_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, description, color, progress, startDate, endDate, createdAt, updatedAt, sort_order
             FROM goals ORDER BY sort_order ASC",
        )?;
        let goals = stmt
            .query_map([], parse_goal_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, avatarColor, sortOrder FROM one_on_one_people ORDER BY sortOrder ASC",
        )?;
        let people = stmt
            .query_map([], |row| {
                Ok(Person {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    avatar_color: row.get(2)?,
                    sort_order: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, personId, content, isCompleted, createdAt FROM one_on_ones ORDER BY createdAt DESC",
        )?;
        let one_on_ones = stmt
            .query_map([], |row| {
                Ok(OneOnOneItem {
                    id: row.get(0)?,
                    person_id: row.get(1)?,
                    content: row.get(2)?,
                    is_completed: row.get::<_, i64>(3)? != 0,
                    created_at: parse_time(&row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RemoteSnapshot {
            tasks,
            goals,
            people,
            one_on_ones,
        })
    }

    pub fn count_rows(&self, table: &str) -> AppResult<i64> {
        if !KNOWN_TABLES.contains(&table) {
            return Err(AppError::InvalidInput(format!("Unknown mirror table '{}'", table)));
        }
        let conn = self.lock()?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }

    fn ensure_schema_extensions(&self) -> AppResult<()> {
        let conn = self.lock()?;
        // Mirrors created before goals were synced lack the ordering column.
        if !column_exists(&conn, "goals", "sort_order")? {
            conn.execute("ALTER TABLE goals ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0", [])?;
        }
        Ok(())
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

#[async_trait]
impl RemoteStore for SqlMirror {
    async fn apply(&self, change: &Change) -> AppResult<()> {
        let mirror = self.clone();
        let change = change.clone();
        tokio::task::spawn_blocking(move || mirror.apply_change(&change))
            .await
            .map_err(|err| AppError::Internal(format!("mirror write task failed: {}", err)))?
    }
}

const KNOWN_TABLES: &[&str] = &[
    "tasks",
    "goals",
    "one_on_one_people",
    "one_on_ones",
    "prompts",
    "ai_logs",
];

// Inserts replace on id conflict so a change retried after a lost acknowledgement stays harmless.

fn insert_task(conn: &Connection, task: &Task, synced_at: &str) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tasks (id, title, content, date, status, priority, category, createdAt, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            task.id,
            task.title,
            task.content,
            task.date.to_string(),
            task.status.as_str(),
            task.priority.as_str(),
            task.category.as_str(),
            task.created_at.to_rfc3339(),
            synced_at,
        ],
    )?;
    Ok(())
}

fn insert_goal(conn: &Connection, goal: &Goal, synced_at: &str) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO goals (
           id, title, description, color, progress, startDate, endDate, createdAt, updatedAt, sort_order, synced_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            goal.id,
            goal.title,
            goal.description,
            goal.color,
            i64::from(goal.progress),
            goal.start_date,
            goal.end_date,
            goal.created_at.to_rfc3339(),
            goal.updated_at.to_rfc3339(),
            goal.sort_order,
            synced_at,
        ],
    )?;
    Ok(())
}

fn insert_person(conn: &Connection, person: &Person, synced_at: &str) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO one_on_one_people (id, name, avatarColor, sortOrder, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![person.id, person.name, person.avatar_color, person.sort_order, synced_at],
    )?;
    Ok(())
}

fn insert_one_on_one(conn: &Connection, item: &OneOnOneItem, synced_at: &str) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO one_on_ones (id, personId, content, isCompleted, createdAt, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.id,
            item.person_id,
            item.content,
            item.is_completed,
            item.created_at.to_rfc3339(),
            synced_at,
        ],
    )?;
    Ok(())
}

fn insert_prompt(conn: &Connection, prompt: &PromptLog, synced_at: &str) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO prompts (id, createdAt, userInput, aiOutput, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            prompt.id,
            prompt.created_at.to_rfc3339(),
            prompt.user_input,
            prompt.ai_output,
            synced_at,
        ],
    )?;
    Ok(())
}

fn insert_ai_log(conn: &Connection, entry: &AiLogEntry, synced_at: &str) -> AppResult<()> {
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT OR REPLACE INTO ai_logs (id, createdAt, eventType, userMessage, aiMessage, metadata, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.created_at.to_rfc3339(),
            entry.event_type,
            entry.user_message,
            entry.ai_message,
            metadata,
            synced_at,
        ],
    )?;
    Ok(())
}

type Assignments = Vec<(&'static str, Value)>;

fn task_assignments(patch: &TaskPatch) -> Assignments {
    let mut out = Assignments::new();
    if let Some(title) = &patch.title {
        out.push(("title", Value::Text(title.clone())));
    }
    if let Some(content) = &patch.content {
        out.push(("content", Value::Text(content.clone())));
    }
    if let Some(date) = patch.date {
        out.push(("date", Value::Text(date.to_string())));
    }
    if let Some(status) = patch.status {
        out.push(("status", Value::Text(status.as_str().to_string())));
    }
    if let Some(priority) = patch.priority {
        out.push(("priority", Value::Text(priority.as_str().to_string())));
    }
    if let Some(category) = patch.category {
        out.push(("category", Value::Text(category.as_str().to_string())));
    }
    out
}

fn goal_assignments(patch: &GoalPatch, updated_at: DateTime<Utc>) -> Assignments {
    let mut out = Assignments::new();
    if let Some(title) = &patch.title {
        out.push(("title", Value::Text(title.clone())));
    }
    if let Some(description) = &patch.description {
        out.push(("description", Value::Text(description.clone())));
    }
    if let Some(color) = &patch.color {
        out.push(("color", Value::Text(color.clone())));
    }
    if let Some(progress) = patch.progress {
        out.push(("progress", Value::Integer(i64::from(progress.min(100)))));
    }
    if let Some(start_date) = &patch.start_date {
        out.push(("startDate", Value::Text(start_date.clone())));
    }
    if let Some(end_date) = &patch.end_date {
        out.push(("endDate", Value::Text(end_date.clone())));
    }
    if let Some(sort_order) = patch.sort_order {
        out.push(("sort_order", Value::Integer(sort_order)));
    }
    out.push(("updatedAt", Value::Text(updated_at.to_rfc3339())));
    out
}

fn person_assignments(patch: &PersonPatch) -> Assignments {
    let mut out = Assignments::new();
    if let Some(name) = &patch.name {
        out.push(("name", Value::Text(name.clone())));
    }
    if let Some(avatar_color) = &patch.avatar_color {
        out.push(("avatarColor", Value::Text(avatar_color.clone())));
    }
    if let Some(sort_order) = patch.sort_order {
        out.push(("sortOrder", Value::Integer(sort_order)));
    }
    out
}

fn one_on_one_assignments(patch: &OneOnOnePatch) -> Assignments {
    let mut out = Assignments::new();
    if let Some(content) = &patch.content {
        out.push(("content", Value::Text(content.clone())));
    }
    if let Some(is_completed) = patch.is_completed {
        out.push(("isCompleted", Value::Integer(i64::from(is_completed))));
    }
    out
}

fn update_row(
    conn: &Connection,
    table: &str,
    id: &str,
    assignments: Assignments,
    synced_at: &str,
) -> AppResult<()> {
    if assignments.is_empty() {
        return Ok(());
    }
    let mut clauses = assignments
        .iter()
        .enumerate()
        .map(|(index, (column, _))| format!("{} = ?{}", column, index + 1))
        .collect::<Vec<_>>();
    clauses.push(format!("synced_at = ?{}", assignments.len() + 1));
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        table,
        clauses.join(", "),
        assignments.len() + 2
    );

    let mut values = assignments.into_iter().map(|(_, value)| value).collect::<Vec<_>>();
    values.push(Value::Text(synced_at.to_string()));
    values.push(Value::Text(id.to_string()));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn delete_row(conn: &Connection, table: &str, id: &str) -> AppResult<()> {
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
    Ok(())
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let date: String = row.get(3)?;
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let category: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        date: DateKey::parse(&date).unwrap_or(DateKey::Inbox),
        status: TaskStatus::from_legacy(&status).unwrap_or_default(),
        priority: TaskPriority::from_legacy(&priority).unwrap_or_default(),
        category: TaskCategory::parse(&category).unwrap_or_default(),
        created_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_goal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Goal> {
    Ok(Goal {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        progress: row.get::<_, i64>(4)?.clamp(0, 100) as u8,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
        updated_at: parse_time(&row.get::<_, String>(8)?)?,
        sort_order: row.get(9)?,
    })
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}
