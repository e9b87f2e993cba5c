use crate::domain::models::{Event, EventPatch, Identity, NewEvent, Settings, Task, TaskPatch};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_gate::SqliteSessionGate;
use crate::infrastructure::storage::{
    initialize_database, open_store_connection, verify_store_credential,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

/// Owner-partitioned persistence for tasks, events and settings.
///
/// Every read filters by owner and every mutation matches `id AND user_id`, so
/// a row owned by someone else behaves exactly like a missing row.
pub trait RecordStore: Send + Sync {
    fn list_tasks(&self, owner: &Identity) -> Result<Vec<Task>, InfraError>;
    fn insert_task(
        &self,
        owner: &Identity,
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Task, InfraError>;
    /// `None` when no task with `id` belongs to `owner`.
    fn update_task(
        &self,
        owner: &Identity,
        id: i64,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, InfraError>;
    fn delete_task(&self, owner: &Identity, id: i64) -> Result<bool, InfraError>;

    fn list_events(&self, owner: &Identity) -> Result<Vec<Event>, InfraError>;
    fn insert_event(&self, owner: &Identity, event: &NewEvent) -> Result<Event, InfraError>;
    fn update_event(
        &self,
        owner: &Identity,
        id: i64,
        patch: &EventPatch,
    ) -> Result<Option<Event>, InfraError>;
    fn delete_event(&self, owner: &Identity, id: i64) -> Result<bool, InfraError>;

    fn load_settings(&self, owner: &Identity) -> Result<Option<Settings>, InfraError>;
    fn upsert_settings(&self, owner: &Identity, accent: &str, dark: bool) -> Result<(), InfraError>;
}

/// SQLite-backed store. One connection behind a mutex serializes writers.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(store_url: &str, credential: &str) -> Result<Self, InfraError> {
        let connection = open_store_connection(store_url)?;
        initialize_database(&connection)?;
        verify_store_credential(&connection, credential)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Session lookups share this store's connection.
    pub fn session_gate(&self) -> SqliteSessionGate {
        SqliteSessionGate::new(Arc::clone(&self.connection))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, InfraError> {
        self.connection
            .lock()
            .map_err(|error| InfraError::StorageUnavailable(format!("store lock poisoned: {error}")))
    }
}

fn millis_to_datetime(value: i64, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(index, value))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        done: row.get::<_, i64>(3)? != 0,
        created_at: millis_to_datetime(row.get(4)?, 4)?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        start: millis_to_datetime(row.get(3)?, 3)?,
        end: millis_to_datetime(row.get(4)?, 4)?,
    })
}

const TASK_COLUMNS: &str = "id, user_id, title, done, created_at";
const EVENT_COLUMNS: &str = "id, user_id, title, start_at, end_at";

impl RecordStore for SqliteRecordStore {
    fn list_tasks(&self, owner: &Identity) -> Result<Vec<Task>, InfraError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY id DESC"
        ))?;
        let tasks = statement
            .query_map(params![owner.user_id()], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn insert_task(
        &self,
        owner: &Identity,
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Task, InfraError> {
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO tasks (user_id, title, done, created_at) VALUES (?1, ?2, 0, ?3)",
            params![owner.user_id(), title, created_at.timestamp_millis()],
        )?;
        Ok(Task {
            id: connection.last_insert_rowid(),
            user_id: owner.user_id().to_string(),
            title: title.to_string(),
            done: false,
            created_at,
        })
    }

    fn update_task(
        &self,
        owner: &Identity,
        id: i64,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, InfraError> {
        let mut connection = self.lock()?;
        let transaction = connection.transaction()?;
        let current = transaction
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![id, owner.user_id()],
                row_to_task,
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(None);
        };

        let merged = patch.merge(&current).map_err(InfraError::Validation)?;
        transaction.execute(
            "UPDATE tasks SET title = ?1, done = ?2 WHERE id = ?3 AND user_id = ?4",
            params![merged.title, merged.done, id, owner.user_id()],
        )?;
        transaction.commit()?;
        Ok(Some(merged))
    }

    fn delete_task(&self, owner: &Identity, id: i64) -> Result<bool, InfraError> {
        let connection = self.lock()?;
        let removed = connection.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![id, owner.user_id()],
        )?;
        Ok(removed > 0)
    }

    fn list_events(&self, owner: &Identity) -> Result<Vec<Event>, InfraError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 ORDER BY start_at ASC, id ASC"
        ))?;
        let events = statement
            .query_map(params![owner.user_id()], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn insert_event(&self, owner: &Identity, event: &NewEvent) -> Result<Event, InfraError> {
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO events (user_id, title, start_at, end_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                owner.user_id(),
                event.title,
                event.start.timestamp_millis(),
                event.end.timestamp_millis()
            ],
        )?;
        Ok(Event {
            id: connection.last_insert_rowid(),
            user_id: owner.user_id().to_string(),
            title: event.title.clone(),
            start: event.start,
            end: event.end,
        })
    }

    fn update_event(
        &self,
        owner: &Identity,
        id: i64,
        patch: &EventPatch,
    ) -> Result<Option<Event>, InfraError> {
        let mut connection = self.lock()?;
        let transaction = connection.transaction()?;
        let current = transaction
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1 AND user_id = ?2"),
                params![id, owner.user_id()],
                row_to_event,
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(None);
        };

        let merged = patch.merge(&current).map_err(InfraError::Validation)?;
        transaction.execute(
            "UPDATE events SET title = ?1, start_at = ?2, end_at = ?3 WHERE id = ?4 AND user_id = ?5",
            params![
                merged.title,
                merged.start.timestamp_millis(),
                merged.end.timestamp_millis(),
                id,
                owner.user_id()
            ],
        )?;
        transaction.commit()?;
        Ok(Some(merged))
    }

    fn delete_event(&self, owner: &Identity, id: i64) -> Result<bool, InfraError> {
        let connection = self.lock()?;
        let removed = connection.execute(
            "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
            params![id, owner.user_id()],
        )?;
        Ok(removed > 0)
    }

    fn load_settings(&self, owner: &Identity) -> Result<Option<Settings>, InfraError> {
        let connection = self.lock()?;
        let settings = connection
            .query_row(
                "SELECT user_id, accent, dark FROM settings WHERE user_id = ?1",
                params![owner.user_id()],
                |row| {
                    Ok(Settings {
                        user_id: row.get(0)?,
                        accent: row.get(1)?,
                        dark: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(settings)
    }

    fn upsert_settings(&self, owner: &Identity, accent: &str, dark: bool) -> Result<(), InfraError> {
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO settings (user_id, accent, dark)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
               accent = excluded.accent,
               dark = excluded.dark",
            params![owner.user_id(), accent, dark],
        )?;
        Ok(())
    }
}
