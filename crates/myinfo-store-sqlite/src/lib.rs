use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use myinfo_core::{
    CatalogError, Category, ColumnValue, DataType, FieldDefinition, FieldPatch, NewFieldDefinition,
    Sensitivity,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS fields (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  category TEXT NOT NULL CHECK (category IN ('Personal','Education','Work','Finance','Social')),
  subcategory TEXT NOT NULL,
  name TEXT NOT NULL,
  datatype TEXT NOT NULL CHECK (datatype IN ('NULL','INTEGER','REAL','TEXT','BLOB')),
  rules TEXT NOT NULL DEFAULT '',
  formats TEXT NOT NULL DEFAULT '',
  sensitivity TEXT NOT NULL CHECK (sensitivity IN ('low','medium','high')),
  multiplicity INTEGER NOT NULL DEFAULT 0 CHECK (multiplicity IN (0, 1)),
  UNIQUE(category, subcategory, name, datatype, rules, formats, sensitivity, multiplicity)
);

CREATE INDEX IF NOT EXISTS idx_fields_category ON fields(category);
";

const FIELD_COLUMNS: &str =
    "id, category, subcategory, name, datatype, rules, formats, sensitivity, multiplicity";

/// Field catalog backed by one `SQLite` file.
///
/// Each instance owns one connection; callers are expected to open, use and
/// drop it per logical operation.
pub struct SqliteCatalog {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub before_version: i64,
    pub after_version: i64,
    pub applied_versions: Vec<i64>,
    /// True only when this call created the catalog table.
    pub created_schema: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub field_count: i64,
    pub schema_status: SchemaStatus,
}

impl SqliteCatalog {
    /// Open a SQLite-backed field catalog and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// Safe to call on every open; an up-to-date catalog is left untouched and
    /// the report says so.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<MigrationReport> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 && table_exists(&self.conn, "fields")? {
            // Catalog created before migrations were recorded.
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        let before_version = version;
        let mut applied_versions = Vec::new();

        if version < 1 {
            self.apply_migration_1()?;
            applied_versions.push(1);
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if applied_versions.is_empty() {
            tracing::debug!(version, "field catalog schema already up to date");
        } else {
            tracing::info!(?applied_versions, "field catalog schema migrated");
        }

        Ok(MigrationReport {
            before_version,
            after_version: version,
            created_schema: applied_versions.contains(&1),
            applied_versions,
        })
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to create field catalog table")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now_rfc3339()?],
        )
        .context("failed to record migration version 1")?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(())
    }

    /// Insert one field definition and return it with its assigned id.
    ///
    /// # Errors
    /// Returns [`CatalogError::DuplicateDefinition`] (wrapped) when an identical
    /// definition already exists, or an error when validation or the insert fails.
    pub fn add_field(&mut self, definition: &NewFieldDefinition) -> Result<FieldDefinition> {
        definition.validate()?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        let inserted = tx.execute(
            "INSERT INTO fields(
                category, subcategory, name, datatype, rules, formats, sensitivity, multiplicity
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                definition.category.as_str(),
                definition.subcategory,
                definition.name,
                definition.datatype.as_str(),
                definition.rules,
                definition.formats,
                definition.sensitivity.as_str(),
                definition.multiplicity,
            ],
        );
        if let Err(err) = inserted {
            return Err(map_write_error(err, &definition.name, "failed to insert field"));
        }
        let id = tx.last_insert_rowid();
        tx.commit().context("failed to commit field insert")?;

        tracing::info!(id, name = %definition.name, "field added");
        Ok(FieldDefinition {
            id,
            category: definition.category,
            subcategory: definition.subcategory.clone(),
            name: definition.name.clone(),
            datatype: definition.datatype,
            rules: definition.rules.clone(),
            formats: definition.formats.clone(),
            sensitivity: definition.sensitivity,
            multiplicity: definition.multiplicity,
        })
    }

    /// Apply a partial update to the field with `id`.
    ///
    /// Returns `false` for an empty patch or an unknown id.
    ///
    /// # Errors
    /// Returns [`CatalogError::DuplicateDefinition`] (wrapped) when the patched
    /// row would collide with another row, or an error when the update fails.
    pub fn update_field(&mut self, id: i64, patch: &FieldPatch) -> Result<bool> {
        let assignments = patch.assignments();
        if assignments.is_empty() {
            tracing::debug!(id, "empty field patch ignored");
            return Ok(false);
        }
        patch.validate()?;

        let set_clause = assignments
            .iter()
            .enumerate()
            .map(|(index, (column, _))| format!("{} = ?{}", column.as_str(), index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE fields SET {set_clause} WHERE id = ?{}", assignments.len() + 1);

        let mut values = assignments
            .into_iter()
            .map(|(_, value)| match value {
                ColumnValue::Text(text) => SqlValue::Text(text),
                ColumnValue::Flag(flag) => SqlValue::Integer(i64::from(flag)),
            })
            .collect::<Vec<_>>();
        values.push(SqlValue::Integer(id));

        let tx = self.conn.transaction().context("failed to start transaction")?;
        let changed = match tx.execute(&sql, params_from_iter(values)) {
            Ok(changed) => changed,
            Err(err) => {
                let name = patch.name.clone().unwrap_or_else(|| format!("field {id}"));
                return Err(map_write_error(err, &name, "failed to update field"));
            }
        };
        tx.commit().context("failed to commit field update")?;

        tracing::info!(id, changed, "field update applied");
        Ok(changed > 0)
    }

    /// Delete the field with `id`. Returns `false` when no such row exists.
    ///
    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn delete_field(&mut self, id: i64) -> Result<bool> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let removed = tx
            .execute("DELETE FROM fields WHERE id = ?1", params![id])
            .context("failed to delete field")?;
        tx.commit().context("failed to commit field delete")?;

        tracing::info!(id, removed, "field delete applied");
        Ok(removed > 0)
    }

    /// Load every field definition ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_fields(&self) -> Result<Vec<FieldDefinition>> {
        let mut stmt =
            self.conn.prepare(&format!("SELECT {FIELD_COLUMNS} FROM fields ORDER BY id ASC"))?;
        let mut rows = stmt.query([])?;
        let mut fields = Vec::new();
        while let Some(row) = rows.next()? {
            fields.push(field_from_row(row)?);
        }
        Ok(fields)
    }

    /// Load the field definitions of one category ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_fields_by_category(&self, category: Category) -> Result<Vec<FieldDefinition>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FIELD_COLUMNS} FROM fields WHERE category = ?1 ORDER BY id ASC"
        ))?;
        let mut rows = stmt.query(params![category.as_str()])?;
        let mut fields = Vec::new();
        while let Some(row) = rows.next()? {
            fields.push(field_from_row(row)?);
        }
        Ok(fields)
    }

    /// # Errors
    /// Returns an error when the lookup or row decoding fails.
    pub fn get_field(&self, id: i64) -> Result<Option<FieldDefinition>> {
        let mut stmt =
            self.conn.prepare(&format!("SELECT {FIELD_COLUMNS} FROM fields WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(field_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Create a consistent copy of the catalog at `out_file`.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let field_count = if table_exists(&self.conn, "fields")? {
            self.conn
                .query_row("SELECT COUNT(*) FROM fields", [], |row| row.get::<_, i64>(0))
                .optional()
                .context("failed to count fields")?
                .unwrap_or(0)
        } else {
            0
        };

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            field_count,
            schema_status,
        })
    }
}

fn field_from_row(row: &Row<'_>) -> Result<FieldDefinition> {
    let category_raw: String = row.get(1)?;
    let datatype_raw: String = row.get(4)?;
    let sensitivity_raw: String = row.get(7)?;
    let multiplicity: i64 = row.get(8)?;

    Ok(FieldDefinition {
        id: row.get(0)?,
        category: Category::parse(&category_raw)
            .ok_or_else(|| anyhow!("unknown category: {category_raw}"))?,
        subcategory: row.get(2)?,
        name: row.get(3)?,
        datatype: DataType::parse(&datatype_raw)
            .ok_or_else(|| anyhow!("unknown datatype: {datatype_raw}"))?,
        rules: row.get(5)?,
        formats: row.get(6)?,
        sensitivity: Sensitivity::parse(&sensitivity_raw)
            .ok_or_else(|| anyhow!("unknown sensitivity: {sensitivity_raw}"))?,
        multiplicity: multiplicity != 0,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn map_write_error(err: rusqlite::Error, name: &str, context: &'static str) -> anyhow::Error {
    if is_unique_violation(&err) {
        return anyhow::Error::new(CatalogError::DuplicateDefinition { name: name.to_string() });
    }
    anyhow::Error::new(err).context(context)
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<i64> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok(recorded);
    }
    if table_exists(conn, "fields")? {
        return Ok(1);
    }
    Ok(0)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
