//! Graph validation command

use std::path::PathBuf;

use catalog_engine::EngineConfig;
use clap::Args;

use super::{load_registry, print_json, read_graph, CliResult};

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Schema registry file (YAML or JSON)
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Mutation graph file (JSON)
    pub graph: PathBuf,
}

pub fn execute(args: ValidateArgs, config: &EngineConfig) -> CliResult {
    let registry = load_registry(args.schema.as_deref(), config)?;
    let graph = read_graph(&args.graph)?;

    match catalog_core::validate(&graph, &registry) {
        Ok(()) => {
            println!("valid: {} node(s)", graph.len());
            Ok(())
        }
        Err(violations) => {
            print_json(&violations.to_json())?;
            Err(format!("graph is invalid ({} violation(s))", violations.len()).into())
        }
    }
}
