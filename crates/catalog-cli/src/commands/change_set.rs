//! Change-set inspection command

use std::path::PathBuf;

use catalog_core::ChangeSetId;
use catalog_engine::EngineConfig;
use catalog_store::ChangeRepo;
use clap::Args;
use serde_json::json;

use super::{open_db, print_json, CliResult};

#[derive(Debug, Args)]
pub struct ChangeSetArgs {
    /// Database file; defaults to `[database] path`
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Change-set id
    #[arg(long)]
    pub id: i64,
}

pub fn execute(args: ChangeSetArgs, config: &EngineConfig) -> CliResult {
    let conn = open_db(args.db, config)?;
    let id = ChangeSetId(args.id);

    let change_set = ChangeRepo::get_change_set(&conn, id)?
        .ok_or_else(|| format!("change-set {} not found", id))?;
    let changes: Vec<_> = ChangeRepo::list_changes(&conn, id)?
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "node_id": c.node_id,
                "kind": c.kind,
                "target_type": c.target_type,
                "target_id": c.target_id,
                "target_version_id": c.target_version_id,
                "disambiguated": c.disambiguated,
                "payload": c.payload,
            })
        })
        .collect();

    print_json(&json!({
        "id": change_set.id,
        "submitter": change_set.submitter,
        "status": change_set.status,
        "schema_version": change_set.schema_version,
        "submitted_at": change_set.submitted_at,
        "finalized_at": change_set.finalized_at,
        "error": change_set.error,
        "changes": changes,
    }))
}
