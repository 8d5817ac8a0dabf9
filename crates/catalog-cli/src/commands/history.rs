//! Entity history command

use std::path::PathBuf;

use catalog_core::EntityId;
use catalog_engine::EngineConfig;
use catalog_store::EntityRepo;
use clap::Args;
use serde_json::json;

use super::{open_db, print_json, CliResult};

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Database file; defaults to `[database] path`
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Entity type (declared spelling)
    #[arg(long = "type")]
    pub entity_type: String,

    /// Entity identifier
    #[arg(long)]
    pub id: String,
}

pub fn execute(args: HistoryArgs, config: &EngineConfig) -> CliResult {
    let conn = open_db(args.db, config)?;
    let id = EntityId::from_string(args.id);

    let entity = EntityRepo::get_typed(&conn, &args.entity_type, &id)?
        .ok_or_else(|| format!("{} {} not found", args.entity_type, id))?;
    let canonical = EntityRepo::resolve_canonical(&conn, &args.entity_type, &id)?
        .map(|e| e.id)
        .filter(|canonical| *canonical != id);

    let mut versions = Vec::new();
    for version in EntityRepo::list_versions(&conn, &id)? {
        versions.push(json!({
            "version_id": version.version_id,
            "version_number": version.version_number,
            "change_id": version.change_id,
            "created_at": version.created_at,
            "state": version.state_value()?,
        }));
    }

    print_json(&json!({
        "@type": entity.entity_type,
        "@id": entity.id,
        "fields": entity.fields,
        "relations": entity.relations,
        "same_as": entity.same_as,
        "canonical": canonical,
        "sources": entity.sources,
        "versions": versions,
    }))
}
