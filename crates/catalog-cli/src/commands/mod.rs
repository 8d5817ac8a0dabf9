//! Subcommands

pub mod change_set;
pub mod history;
pub mod submit;
pub mod validate;

use std::path::{Path, PathBuf};

use catalog_core::{MutationGraph, SchemaRegistry};
use catalog_engine::EngineConfig;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Configuration from `--config`, or defaults
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

/// Registry from `--schema`, falling back to `[schema] path`
pub fn load_registry(
    arg: Option<&Path>,
    config: &EngineConfig,
) -> Result<SchemaRegistry, Box<dyn std::error::Error>> {
    let path = arg
        .or(config.schema.path.as_deref())
        .ok_or("no schema registry: pass --schema or set [schema] path")?;
    Ok(catalog_store::schema_loader::load_registry(path)?)
}

pub fn read_graph(path: &Path) -> Result<MutationGraph, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(MutationGraph::from_json_str(&text)?)
}

/// Database from `--db`, falling back to `[database] path`
pub fn open_db(
    arg: Option<PathBuf>,
    config: &EngineConfig,
) -> Result<rusqlite::Connection, Box<dyn std::error::Error>> {
    let path = arg.unwrap_or_else(|| config.database.path.clone());
    Ok(catalog_store::db::open_and_migrate(
        path,
        config.database.busy_timeout_ms,
    )?)
}

pub fn print_json(value: &serde_json::Value) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
