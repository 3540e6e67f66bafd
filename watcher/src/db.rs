use chrono::NaiveDateTime;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

/// SQLite store of every distinct plate string ever confirmed.
///
/// Schema: a single `plates` table whose `plate_number` column carries a
/// UNIQUE constraint, so the store never holds the same plate twice. Rows are
/// only ever inserted.
pub struct PlateDb {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { id: i64 },
    /// The plate was already on record; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateRecord {
    pub id: i64,
    pub plate_number: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create database directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to open database {0}: {1}")]
    Open(String, rusqlite::Error),
    #[error("failed to create plates schema: {0}")]
    Schema(rusqlite::Error),
    #[error("failed to write plate: {0}")]
    Write(rusqlite::Error),
    #[error("failed to read plates: {0}")]
    Read(rusqlite::Error),
}

impl PlateDb {
    /// Open (or create) the database file and make sure the schema exists.
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::CreateDir(dir.display().to_string(), e))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(path.display().to_string(), e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plates (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                plate_number TEXT UNIQUE,
                timestamp    DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .map_err(StoreError::Schema)?;

        info!(path = path.display().to_string(), "SQLite database opened");

        Ok(Self { conn })
    }

    /// Record a plate. A plate that is already stored comes back as
    /// [`InsertOutcome::Duplicate`] rather than an error.
    pub fn insert(&self, plate: &str) -> Result<InsertOutcome, StoreError> {
        match self
            .conn
            .execute("INSERT INTO plates (plate_number) VALUES (?1)", params![plate])
        {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                debug!(id, plate, "inserted plate");
                Ok(InsertOutcome::Inserted { id })
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                debug!(plate, "plate already stored");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(StoreError::Write(e)),
        }
    }

    /// Look up the record for a plate, if it has been stored.
    pub fn find(&self, plate: &str) -> Result<Option<PlateRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, plate_number, timestamp FROM plates WHERE plate_number = ?1",
                params![plate],
                |row| {
                    Ok(PlateRecord {
                        id: row.get(0)?,
                        plate_number: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::Read)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Number of plates on record.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM plates", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(StoreError::Read)
    }
}
