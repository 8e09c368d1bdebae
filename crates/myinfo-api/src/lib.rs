use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use myinfo_core::{
    group_by_subcategory, Category, Document, FieldDefinition, FieldPatch, MergeStatus,
    NewFieldDefinition, StatusReply, SubcategoryGroup,
};
use myinfo_store_sqlite::{IntegrityReport, MigrationReport, SchemaStatus, SqliteCatalog};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod page;
pub mod sheets;
pub mod user_data;

pub use config::{AppConfig, AppIdentity, ConfigFile};
pub use sheets::{FieldRowSource, ImportSummary, SheetsSource};
pub use user_data::{UserDataError, UserDataStore};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeResult {
    pub created_schema: bool,
    pub schema_version: i64,
    /// Present only when this call created the catalog and a row source was available.
    pub import: Option<ImportSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Row source shared by every facade call in place of the credential file.
pub type SharedRowSource = Arc<dyn FieldRowSource + Send + Sync>;

/// Where a newly created catalog takes its seed rows from.
#[derive(Clone, Copy)]
enum SeedSource<'a> {
    /// The injected row source, else the credential file.
    Configured,
    Explicit(Option<&'a dyn FieldRowSource>),
}

#[derive(Clone)]
pub struct MyInfoApi {
    config: AppConfig,
    row_source: Option<SharedRowSource>,
}

impl fmt::Debug for MyInfoApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MyInfoApi")
            .field("config", &self.config)
            .field("row_source", &self.row_source.as_ref().map(|source| source.describe()))
            .finish()
    }
}

impl MyInfoApi {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config, row_source: None }
    }

    /// Seed a newly created catalog from `source` instead of the configured spreadsheet.
    #[must_use]
    pub fn with_row_source(mut self, source: SharedRowSource) -> Self {
        self.row_source = Some(source);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn open_catalog(&self) -> Result<SqliteCatalog> {
        config::ensure_parent_dir(&self.config.catalog_path)?;
        SqliteCatalog::open(&self.config.catalog_path)
    }

    /// Open the catalog for a data operation, initializing it on first use.
    fn open_initialized_catalog(&self) -> Result<SqliteCatalog> {
        let (catalog, _) = self.prepare_catalog(SeedSource::Configured)?;
        Ok(catalog)
    }

    /// Create the catalog schema if needed and seed it from the configured spreadsheet.
    ///
    /// The import runs on whichever facade call creates the schema, and only
    /// when a row source or credential file is available. Import failures are
    /// logged, never returned.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be opened or migrated.
    pub fn initialize(&self) -> Result<InitializeResult> {
        let (_, result) = self.prepare_catalog(SeedSource::Configured)?;
        Ok(result)
    }

    /// [`MyInfoApi::initialize`] with a caller-provided row source.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be opened or migrated.
    pub fn initialize_with_source(
        &self,
        source: Option<&dyn FieldRowSource>,
    ) -> Result<InitializeResult> {
        let (_, result) = self.prepare_catalog(SeedSource::Explicit(source))?;
        Ok(result)
    }

    /// Migrate the catalog and seed it when this call created the schema.
    fn prepare_catalog(&self, seed: SeedSource<'_>) -> Result<(SqliteCatalog, InitializeResult)> {
        let mut catalog = self.open_catalog()?;
        let report = catalog.migrate()?;
        let import = self.seed_if_created(&mut catalog, &report, seed);
        let result = InitializeResult {
            created_schema: report.created_schema,
            schema_version: report.after_version,
            import,
        };
        Ok((catalog, result))
    }

    fn seed_if_created(
        &self,
        catalog: &mut SqliteCatalog,
        report: &MigrationReport,
        seed: SeedSource<'_>,
    ) -> Option<ImportSummary> {
        if !report.created_schema {
            tracing::debug!(path = %self.config.catalog_path.display(), "field catalog already initialized");
            return None;
        }
        tracing::info!(path = %self.config.catalog_path.display(), "field catalog created");

        if let SeedSource::Explicit(source) = seed {
            return source.and_then(|source| run_import(catalog, source));
        }
        if let Some(source) = &self.row_source {
            return run_import(catalog, source.as_ref());
        }
        match SheetsSource::from_credentials_file(&self.config.credentials_path, &self.config.sheet_url) {
            Ok(Some(source)) => run_import(catalog, &source),
            Ok(None) => {
                tracing::info!(
                    credentials = %self.config.credentials_path.display(),
                    "no spreadsheet credentials, skipping field import"
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    "spreadsheet source unavailable, skipping field import"
                );
                None
            }
        }
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.open_catalog()?.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// A migration that creates the schema seeds it like [`MyInfoApi::initialize`].
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut catalog = self.open_catalog()?;
        let before = catalog.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let report = catalog.migrate()?;
        self.seed_if_created(&mut catalog, &report, SeedSource::Configured);
        let after = catalog.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: report.applied_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the catalog cannot be opened or checked.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.open_catalog()?.integrity_check()
    }

    /// Copy the catalog to `out_file` using the online backup API.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be opened or the copy fails.
    pub fn backup(&self, out_file: &Path) -> Result<PathBuf> {
        config::ensure_parent_dir(out_file)?;
        self.open_initialized_catalog()?.backup_database(out_file)?;
        Ok(out_file.to_path_buf())
    }

    /// # Errors
    /// Returns a wrapped `CatalogError::DuplicateDefinition` for an exact
    /// duplicate, or an error when validation or persistence fails.
    pub fn add_field(&self, definition: &NewFieldDefinition) -> Result<FieldDefinition> {
        self.open_initialized_catalog()?.add_field(definition)
    }

    /// Returns whether a row changed.
    ///
    /// # Errors
    /// Returns an error when the patch is invalid, collides with another row,
    /// or persistence fails.
    pub fn update_field(&self, id: i64, patch: &FieldPatch) -> Result<bool> {
        self.open_initialized_catalog()?.update_field(id, patch)
    }

    /// Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn delete_field(&self, id: i64) -> Result<bool> {
        self.open_initialized_catalog()?.delete_field(id)
    }

    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn get_all_fields(&self) -> Result<Vec<FieldDefinition>> {
        self.open_initialized_catalog()?.list_fields()
    }

    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn get_fields_by_category(&self, category: Category) -> Result<Vec<FieldDefinition>> {
        self.open_initialized_catalog()?.list_fields_by_category(category)
    }

    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn get_field_by_id(&self, id: i64) -> Result<Option<FieldDefinition>> {
        self.open_initialized_catalog()?.get_field(id)
    }

    /// Field names of one category grouped by subcategory, in catalog order.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn group_by_subcategory(&self, category: Category) -> Result<Vec<SubcategoryGroup>> {
        let fields = self.get_fields_by_category(category)?;
        Ok(group_by_subcategory(&fields, category))
    }

    /// # Errors
    /// Returns an error when the data directory cannot be created.
    pub fn user_data_store(&self) -> Result<UserDataStore> {
        Ok(UserDataStore::new(self.config.resolve_data_path()?))
    }

    /// Current user data, empty when missing or unreadable.
    #[must_use]
    pub fn get_user_data(&self) -> Document {
        UserDataStore::new(&self.config.user_data_path).read()
    }

    /// Current user data, reporting a corrupt file instead of hiding it.
    ///
    /// # Errors
    /// Returns [`UserDataError::Corrupt`] or [`UserDataError::Io`].
    pub fn load_user_data(&self) -> Result<Document, UserDataError> {
        UserDataStore::new(&self.config.user_data_path).load()
    }

    /// Merge a JSON object into the user data document.
    ///
    /// Never fails; problems are reported in the reply.
    #[must_use]
    pub fn update_user_data(&self, partial_json: &str) -> StatusReply {
        let store = match self.user_data_store() {
            Ok(store) => store,
            Err(err) => return StatusReply::error(format!("{err:#}")),
        };
        match store.merge(partial_json) {
            Ok(MergeStatus::Success) => StatusReply::success("User data updated."),
            Ok(MergeStatus::Unchanged) => StatusReply::unchanged("No changes to save."),
            Err(err) => {
                tracing::warn!(error = %err, "user data update failed");
                StatusReply::error(err.to_string())
            }
        }
    }

    /// Export the static page to the desktop.
    #[must_use]
    pub fn create_my_info_page(&self) -> StatusReply {
        match self.config.resolve_desktop_dir() {
            Ok(dir) => self.export_page_to(&dir.join(&self.config.output_filename)),
            Err(err) => StatusReply::error(format!("{err:#}")),
        }
    }

    /// Export the static page to an explicit path.
    #[must_use]
    pub fn export_page_to(&self, output: &Path) -> StatusReply {
        let document = self.get_user_data();
        match page::write_page(&document, self.config.template_path.as_deref(), output) {
            Ok(()) => StatusReply::success(format!("Page created: {}", output.display())),
            Err(err) => {
                tracing::warn!(path = %output.display(), error = %format!("{err:#}"), "page export failed");
                StatusReply::error(format!("Failed to create the page: {err:#}"))
            }
        }
    }
}

fn run_import(catalog: &mut SqliteCatalog, source: &dyn FieldRowSource) -> Option<ImportSummary> {
    let description = source.describe();
    match source.fetch_records() {
        Ok(records) => Some(sheets::import_records(catalog, &description, &records)),
        Err(err) => {
            tracing::warn!(
                source = %description,
                error = %format!("{err:#}"),
                "failed to read spreadsheet, catalog left empty"
            );
            None
        }
    }
}
