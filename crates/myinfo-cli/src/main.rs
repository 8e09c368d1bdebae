use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use myinfo_api::{AppConfig, AppIdentity, MyInfoApi};
use myinfo_core::{Category, DataType, FieldPatch, NewFieldDefinition, Sensitivity, StatusReply};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "myinfo")]
#[command(about = "Personal info manager CLI")]
struct Cli {
    /// YAML file overriding the default storage layout.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep every file under this directory instead of the per-user data dir.
    #[arg(long, conflicts_with = "config")]
    data_dir: Option<PathBuf>,

    /// Field catalog database file.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Init,
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Field {
        #[command(subcommand)]
        command: Box<FieldCommand>,
    },
    Data {
        #[command(subcommand)]
        command: DataCommand,
    },
    Page {
        #[command(subcommand)]
        command: PageCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum FieldCommand {
    Add(FieldAddArgs),
    Update(FieldUpdateArgs),
    Delete(FieldIdArgs),
    List(FieldListArgs),
    Get(FieldIdArgs),
    Groups(FieldGroupsArgs),
}

#[derive(Debug, Args)]
struct FieldAddArgs {
    #[arg(long, value_enum)]
    category: CategoryArg,
    #[arg(long)]
    subcategory: String,
    #[arg(long)]
    name: String,
    #[arg(long, value_enum, default_value_t = DataTypeArg::Text)]
    datatype: DataTypeArg,
    #[arg(long, default_value = "")]
    rules: String,
    #[arg(long, default_value = "")]
    formats: String,
    #[arg(long, value_enum, default_value_t = SensitivityArg::Low)]
    sensitivity: SensitivityArg,
    /// The field may hold more than one value.
    #[arg(long, default_value_t = false)]
    multiple: bool,
}

#[derive(Debug, Args)]
struct FieldUpdateArgs {
    #[arg(long)]
    id: i64,
    #[arg(long, value_enum)]
    category: Option<CategoryArg>,
    #[arg(long)]
    subcategory: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, value_enum)]
    datatype: Option<DataTypeArg>,
    #[arg(long)]
    rules: Option<String>,
    #[arg(long)]
    formats: Option<String>,
    #[arg(long, value_enum)]
    sensitivity: Option<SensitivityArg>,
    #[arg(long)]
    multiplicity: Option<bool>,
    /// JSON object of column values, e.g. '{"name":"Legal Name","sensitivity":"high"}'.
    #[arg(long, conflicts_with_all = [
        "category", "subcategory", "name", "datatype", "rules", "formats", "sensitivity", "multiplicity",
    ])]
    patch: Option<String>,
}

#[derive(Debug, Args)]
struct FieldIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct FieldListArgs {
    #[arg(long, value_enum)]
    category: Option<CategoryArg>,
}

#[derive(Debug, Args)]
struct FieldGroupsArgs {
    #[arg(long, value_enum)]
    category: CategoryArg,
}

#[derive(Debug, Subcommand)]
enum DataCommand {
    Path,
    Show,
    Merge(DataMergeArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["json", "file"])))]
struct DataMergeArgs {
    /// JSON object to merge, given inline.
    #[arg(long)]
    json: Option<String>,
    /// File holding the JSON object to merge.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum PageCommand {
    Export(PageExportArgs),
}

#[derive(Debug, Args)]
struct PageExportArgs {
    /// Write here instead of the desktop.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CategoryArg {
    Personal,
    Education,
    Work,
    Finance,
    Social,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DataTypeArg {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SensitivityArg {
    Low,
    Medium,
    High,
}

impl From<CategoryArg> for Category {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::Personal => Self::Personal,
            CategoryArg::Education => Self::Education,
            CategoryArg::Work => Self::Work,
            CategoryArg::Finance => Self::Finance,
            CategoryArg::Social => Self::Social,
        }
    }
}

impl From<DataTypeArg> for DataType {
    fn from(value: DataTypeArg) -> Self {
        match value {
            DataTypeArg::Null => Self::Null,
            DataTypeArg::Integer => Self::Integer,
            DataTypeArg::Real => Self::Real,
            DataTypeArg::Text => Self::Text,
            DataTypeArg::Blob => Self::Blob,
        }
    }
}

impl From<SensitivityArg> for Sensitivity {
    fn from(value: SensitivityArg) -> Self {
        match value {
            SensitivityArg::Low => Self::Low,
            SensitivityArg::Medium => Self::Medium,
            SensitivityArg::High => Self::High,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

/// Print a successful reply; an error reply becomes the command's failure.
fn emit_reply(reply: StatusReply, extra: Value) -> Result<()> {
    if reply.is_error() {
        return Err(anyhow!(reply.message));
    }
    let mut payload = serde_json::to_value(&reply)?;
    if let (Value::Object(payload), Value::Object(extra)) = (&mut payload, extra) {
        payload.extend(extra);
    }
    emit_json(payload)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the JSON contract, so logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let identity = AppIdentity::default();
    let mut config = match (&cli.config, &cli.data_dir) {
        (Some(path), _) => AppConfig::load(path, &identity)?,
        (None, Some(dir)) => AppConfig::rooted_at(dir),
        (None, None) => AppConfig::default_for_platform(&identity)?,
    };
    if let Some(db) = &cli.db {
        config.catalog_path.clone_from(db);
    }
    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = MyInfoApi::new(resolve_config(&cli)?);
    match cli.command {
        Command::Init => emit_json(serde_json::to_value(api.initialize()?)?),
        Command::Db { command } => run_db(command, &api),
        Command::Field { command } => run_field(*command, &api),
        Command::Data { command } => run_data(command, &api),
        Command::Page { command } => run_page(command, &api),
    }
}

fn run_db(command: DbCommand, api: &MyInfoApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
        DbCommand::IntegrityCheck => emit_json(serde_json::to_value(api.integrity_check()?)?),
        DbCommand::Backup(args) => {
            let path = api.backup(&args.out)?;
            emit_json(serde_json::json!({ "backup_path": path }))
        }
    }
}

fn run_field(command: FieldCommand, api: &MyInfoApi) -> Result<()> {
    match command {
        FieldCommand::Add(args) => {
            let definition = NewFieldDefinition {
                category: args.category.into(),
                subcategory: args.subcategory,
                name: args.name,
                datatype: args.datatype.into(),
                rules: args.rules,
                formats: args.formats,
                sensitivity: args.sensitivity.into(),
                multiplicity: args.multiple,
            };
            let field = api.add_field(&definition)?;
            emit_json(serde_json::json!({ "field": field }))
        }
        FieldCommand::Update(args) => {
            let id = args.id;
            let patch = match args.patch {
                Some(raw) => {
                    serde_json::from_str::<FieldPatch>(&raw).context("invalid --patch JSON")?
                }
                None => FieldPatch {
                    category: args.category.map(Into::into),
                    subcategory: args.subcategory,
                    name: args.name,
                    datatype: args.datatype.map(Into::into),
                    rules: args.rules,
                    formats: args.formats,
                    sensitivity: args.sensitivity.map(Into::into),
                    multiplicity: args.multiplicity,
                },
            };
            let updated = api.update_field(id, &patch)?;
            emit_json(serde_json::json!({ "id": id, "updated": updated }))
        }
        FieldCommand::Delete(args) => {
            let deleted = api.delete_field(args.id)?;
            emit_json(serde_json::json!({ "id": args.id, "deleted": deleted }))
        }
        FieldCommand::List(args) => {
            let fields = match args.category {
                Some(category) => api.get_fields_by_category(category.into())?,
                None => api.get_all_fields()?,
            };
            emit_json(serde_json::json!({ "count": fields.len(), "fields": fields }))
        }
        FieldCommand::Get(args) => {
            let field = api.get_field_by_id(args.id)?;
            emit_json(serde_json::json!({ "id": args.id, "field": field }))
        }
        FieldCommand::Groups(args) => {
            let category = Category::from(args.category);
            let groups = api.group_by_subcategory(category)?;
            emit_json(serde_json::json!({ "category": category, "groups": groups }))
        }
    }
}

fn run_data(command: DataCommand, api: &MyInfoApi) -> Result<()> {
    match command {
        DataCommand::Path => {
            let path = api.config().resolve_data_path()?;
            emit_json(serde_json::json!({ "path": path }))
        }
        DataCommand::Show => {
            let document = api.load_user_data()?;
            emit_json(serde_json::json!({
                "path": api.config().user_data_path,
                "document": document
            }))
        }
        DataCommand::Merge(args) => {
            let partial = match (args.json, args.file) {
                (Some(json), _) => json,
                (None, Some(file)) => fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?,
                (None, None) => return Err(anyhow!("one of --json or --file is required")),
            };
            let reply = api.update_user_data(&partial);
            emit_reply(reply, serde_json::json!({ "path": api.config().user_data_path }))
        }
    }
}

fn run_page(command: PageCommand, api: &MyInfoApi) -> Result<()> {
    match command {
        PageCommand::Export(args) => {
            let (reply, path) = match args.out {
                Some(out) => (api.export_page_to(&out), out),
                None => {
                    let dir = api.config().resolve_desktop_dir()?;
                    let out = dir.join(&api.config().output_filename);
                    (api.export_page_to(&out), out)
                }
            };
            emit_reply(reply, serde_json::json!({ "path": path }))
        }
    }
}
