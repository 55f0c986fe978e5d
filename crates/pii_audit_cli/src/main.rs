//! `pii-audit` entry point.
//!
//! # Responsibility
//! - `run`: map flags and `PII_AUDIT_*` variables onto a `PipelineConfig`,
//!   run the pipeline once against a SQLite warehouse file and print the
//!   run report as one JSON line on stdout.
//! - `tag` / `untag` / `tags`: maintain the policy-tag registry the
//!   pipeline discovers PII columns from.

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use pii_audit_core::db::open_db;
use pii_audit_core::{
    default_log_level, init_logging, init_stderr_logging, AnonymizationPipeline, ColumnName,
    PipelineConfig, SqlitePolicyTagRegistry, SqliteWarehouse, TableId,
};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_POLICY_TAG: &str = "pii";

/// Rewrites PII columns of a table to their first anonymized state and
/// records newly anonymized ids in the audit ledger.
#[derive(Parser, Debug)]
#[command(name = "pii-audit", version, about)]
struct Cli {
    /// trace|debug|info|warn|error
    #[arg(long, global = true, value_name = "LEVEL", env = "PII_AUDIT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Absolute directory for rotating log files; logs go to stderr otherwise.
    #[arg(long, global = true, value_name = "ABS_DIR", env = "PII_AUDIT_LOG_DIR")]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Anonymize one table and append its new audit entries.
    Run(RunArgs),
    /// Tag columns of a table as PII.
    Tag(TagArgs),
    /// Remove PII tags from columns of a table.
    Untag(UntagArgs),
    /// List the PII columns of a table in discovery order.
    Tags(TagsArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Target table as `project.dataset.table`.
    #[arg(value_name = "TABLE_ID", env = "PII_AUDIT_TABLE")]
    table_id: TableId,

    /// SQLite warehouse file.
    #[arg(long, value_name = "PATH", env = "PII_AUDIT_WAREHOUSE")]
    warehouse: PathBuf,

    /// Policy-tag registry database (defaults to the warehouse file).
    #[arg(long, value_name = "PATH", env = "PII_AUDIT_REGISTRY")]
    registry: Option<PathBuf>,

    /// Audit ledger table (defaults to `<project>.<dataset>.audit_table`).
    #[arg(long, value_name = "TABLE_ID", env = "PII_AUDIT_LEDGER")]
    ledger: Option<TableId>,

    /// Literal substring that marks an anonymized row.
    #[arg(long, value_name = "TEXT", env = "PII_AUDIT_MARKER")]
    marker: Option<String>,

    /// Column searched for the marker.
    #[arg(long, value_name = "NAME", env = "PII_AUDIT_MARKER_COLUMN")]
    marker_column: Option<ColumnName>,

    /// Upper bound on each warehouse job.
    #[arg(long, value_name = "N", env = "PII_AUDIT_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct RegistryArgs {
    /// Policy-tag registry database; usually the warehouse file.
    #[arg(long, value_name = "PATH", env = "PII_AUDIT_REGISTRY")]
    registry: PathBuf,

    /// Table as `project.dataset.table`.
    #[arg(value_name = "TABLE_ID")]
    table_id: TableId,
}

#[derive(Args, Debug)]
struct TagArgs {
    #[command(flatten)]
    target: RegistryArgs,

    /// Columns to tag, in discovery order.
    #[arg(value_name = "COLUMN", required = true)]
    columns: Vec<String>,

    /// Policy tag recorded for each column.
    #[arg(long, value_name = "TAG", default_value = DEFAULT_POLICY_TAG)]
    policy_tag: String,
}

#[derive(Args, Debug)]
struct UntagArgs {
    #[command(flatten)]
    target: RegistryArgs,

    /// Columns to untag.
    #[arg(value_name = "COLUMN", required = true)]
    columns: Vec<String>,
}

#[derive(Args, Debug)]
struct TagsArgs {
    #[command(flatten)]
    target: RegistryArgs,
}

impl RunArgs {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::new(self.table_id.clone())
            .with_context(|| format!("cannot derive defaults for `{}`", self.table_id))?;
        if let Some(ledger) = &self.ledger {
            config = config.with_ledger(ledger.clone());
        }
        if let Some(marker) = &self.marker {
            config = config.with_marker(marker.clone());
        }
        if let Some(marker_column) = &self.marker_column {
            config = config.with_marker_column(marker_column.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_job_timeout(Duration::from_secs(secs));
        }
        config.validate().context("invalid pipeline configuration")?;
        Ok(config)
    }
}

impl RegistryArgs {
    fn open(&self) -> anyhow::Result<Connection> {
        open_db(&self.registry)
            .with_context(|| format!("failed to open registry `{}`", self.registry.display()))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    match &cli.log_dir {
        Some(dir) => init_logging(level, dir),
        None => init_stderr_logging(level),
    }
    .map_err(|err| anyhow!(err))
    .context("failed to initialize logging")?;

    let output = match cli.command {
        Commands::Run(args) => run_pipeline(&args)?,
        Commands::Tag(args) => {
            let conn = args.target.open()?;
            tag_columns(&conn, &args)?
        }
        Commands::Untag(args) => {
            let conn = args.target.open()?;
            untag_columns(&conn, &args)?
        }
        Commands::Tags(args) => {
            let conn = args.target.open()?;
            list_tags(&conn, &args.target.table_id)?
        }
    };
    println!("{output}");
    Ok(())
}

fn run_pipeline(args: &RunArgs) -> anyhow::Result<serde_json::Value> {
    let config = args.pipeline_config()?;

    let registry_path = args.registry.as_ref().unwrap_or(&args.warehouse);
    let registry_conn = open_db(registry_path)
        .with_context(|| format!("failed to open registry `{}`", registry_path.display()))?;
    let registry = SqlitePolicyTagRegistry::try_new(&registry_conn)?;
    let warehouse = SqliteWarehouse::open(&args.warehouse)
        .with_context(|| format!("failed to open warehouse `{}`", args.warehouse.display()))?;

    let report = AnonymizationPipeline::new(config, registry, warehouse).run()?;
    Ok(serde_json::to_value(&report)?)
}

fn tag_columns(conn: &Connection, args: &TagArgs) -> anyhow::Result<serde_json::Value> {
    let registry = SqlitePolicyTagRegistry::try_new(conn)?;
    let table_id = &args.target.table_id;
    for column in &args.columns {
        registry
            .tag_column(table_id, column, &args.policy_tag)
            .with_context(|| format!("failed to tag `{table_id}`.`{column}`"))?;
    }
    list_tags(conn, table_id)
}

fn untag_columns(conn: &Connection, args: &UntagArgs) -> anyhow::Result<serde_json::Value> {
    let registry = SqlitePolicyTagRegistry::try_new(conn)?;
    let table_id = &args.target.table_id;
    let mut removed = Vec::new();
    for column in &args.columns {
        if registry
            .untag_column(table_id, column)
            .with_context(|| format!("failed to untag `{table_id}`.`{column}`"))?
        {
            removed.push(column.clone());
        } else {
            log::warn!(
                "event=policy_tag_remove module=cli status=skip reason=not_tagged table_id={table_id} column={column}"
            );
        }
    }
    Ok(json!({
        "table_id": table_id.to_string(),
        "removed": removed,
        "bindings": list_tags(conn, table_id)?["bindings"].clone(),
    }))
}

fn list_tags(conn: &Connection, table_id: &TableId) -> anyhow::Result<serde_json::Value> {
    let registry = SqlitePolicyTagRegistry::try_new(conn)?;
    let bindings = registry.list_bindings(table_id)?;
    Ok(json!({
        "table_id": table_id.to_string(),
        "bindings": bindings,
    }))
}
