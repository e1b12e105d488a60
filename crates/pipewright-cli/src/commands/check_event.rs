//! Check whether a source event triggers a project.

use anyhow::{Context, Result, anyhow};
use pipewright_config::VariableContext;
use pipewright_core::webhook::{EventAction, SourceEvent};
use std::path::Path;
use tracing::debug;

use crate::CheckEventArgs;

pub fn run(config: &Path, vars: VariableContext, args: &CheckEventArgs) -> Result<()> {
    let assembly = super::synthesize(&super::load(config, vars)?)?;
    let project = assembly
        .project(&args.project)
        .ok_or_else(|| anyhow!("no project named '{}'", args.project))?;

    let event = event_from_args(args)?;
    debug!(
        action = %event.action,
        source = ?event.source_branch,
        target = ?event.target_branch,
        "Evaluating event"
    );

    let verdict = if project.should_build(&event) {
        "trigger"
    } else {
        "skip"
    };
    println!("{}: {}", project.name(), verdict);
    Ok(())
}

fn event_from_args(args: &CheckEventArgs) -> Result<SourceEvent> {
    if let Some(path) = &args.payload {
        let event_type = args
            .github_event
            .as_deref()
            .ok_or_else(|| anyhow!("--github-event is required with --payload"))?;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let payload: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        return SourceEvent::from_github_payload(event_type, &payload)
            .ok_or_else(|| anyhow!("payload is not a valid '{}' event", event_type));
    }

    let action = args
        .action
        .as_deref()
        .map(EventAction::parse)
        .ok_or_else(|| anyhow!("--action is required without --payload"))?;
    Ok(SourceEvent {
        action,
        source_branch: args.source_branch.clone(),
        target_branch: args.target_branch.clone(),
        actor: args.actor.clone(),
    })
}
