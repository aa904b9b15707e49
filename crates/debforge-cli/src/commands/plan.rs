//! Plan command implementation

use std::path::PathBuf;

use color_eyre::eyre::Result;
use debforge_build::{BuildError, Orchestrator, RunPlan};
use debforge_core::ExitCode;
use debforge_graph::{DependencyGraph, GraphError};
use tracing::info;

/// Plan command implementation
pub struct PlanCommand {
    config_path: PathBuf,
    targets: Vec<String>,
    json: bool,
    include_retired: bool,
}

impl PlanCommand {
    pub fn new(config_path: PathBuf, targets: Vec<String>, json: bool, include_retired: bool) -> Self {
        Self { config_path, targets, json, include_retired }
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        let mut config = super::load_config(&self.config_path)?;
        if self.include_retired {
            config.build.include_retired = true;
        }
        let (managed, collaborators) = super::collaborators(&config)?;
        let roots = managed.resolve_all(self.targets.as_slice())?;
        info!("Planning {} root packages", roots.len());

        let orchestrator = Orchestrator::new(config, collaborators)?;
        let planned = orchestrator
            .plan(&roots)
            .and_then(|graph| Ok((RunPlan::from_graph(&graph)?, graph)));
        match planned {
            Ok((plan, graph)) => {
                if self.json {
                    self.print_json(&plan, &graph)?;
                } else {
                    print_plan(&plan, &graph);
                }
                Ok(ExitCode::Success)
            }
            Err(BuildError::Graph(error)) => {
                print_graph_error(&error);
                Ok(error.exit_code())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn print_json(&self, plan: &RunPlan, graph: &DependencyGraph) -> Result<()> {
        let blocked: Vec<_> = graph
            .blocked()
            .into_iter()
            .map(|node| serde_json::json!({ "id": node.id, "reason": node.reason }))
            .collect();
        let document = serde_json::json!({
            "roots": self.targets,
            "plan": plan,
            "blocked": blocked,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        Ok(())
    }
}

fn print_plan(plan: &RunPlan, graph: &DependencyGraph) {
    println!("Build plan: {} packages in {} batches", plan.nodes.len(), plan.batches.len());
    for batch in &plan.batches {
        let members: Vec<&str> = batch.members.iter().map(|id| id.as_str()).collect();
        println!("  Batch {}: {}", batch.index + 1, members.join(", "));
    }

    let blocked = graph.blocked();
    if !blocked.is_empty() {
        println!("Blocked:");
        for node in blocked {
            println!("  {} ({})", node.id, node.reason.as_deref().unwrap_or("blocked"));
        }
    }
    if !plan.external.is_empty() {
        println!("Already available:");
        for (id, version) in &plan.external {
            println!("  {id} {version}");
        }
    }
    if !plan.excluded.is_empty() {
        println!("Excluded:");
        for excluded in &plan.excluded {
            println!("  {} ({})", excluded.id, excluded.reason);
        }
    }
}

fn print_graph_error(error: &GraphError) {
    println!("✗ {error}");
    if let GraphError::MissingPackages { missing } = error {
        for package in missing {
            let required_by: Vec<&str> = package.required_by.iter().map(|id| id.as_str()).collect();
            if required_by.is_empty() {
                println!("  {} (requested)", package.id);
            } else {
                println!("  {} required by {}", package.id, required_by.join(", "));
            }
            println!("    {}", package.suggested_action);
        }
    }
}
