//! Graph submission command

use std::path::PathBuf;

use catalog_engine::{EngineConfig, Submitter};
use clap::Args;

use super::{load_registry, open_db, print_json, read_graph, CliResult};

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Database file; defaults to `[database] path`
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Schema registry file (YAML or JSON)
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Identity of the producer the graph comes from
    #[arg(long)]
    pub submitter: String,

    /// Mutation graph file (JSON)
    pub graph: PathBuf,
}

pub fn execute(args: SubmitArgs, config: &EngineConfig) -> CliResult {
    let registry = load_registry(args.schema.as_deref(), config)?;
    let graph = read_graph(&args.graph)?;
    let mut conn = open_db(args.db, config)?;

    let result = Submitter::new(&registry, &config.retry).submit(&mut conn, &graph, &args.submitter)?;
    print_json(&result.to_json())?;

    if !result.is_accepted() {
        let id = result
            .change_set_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        return Err(format!("change-set {} rejected", id).into());
    }
    Ok(())
}
