use std::collections::BTreeMap;

use tally_core::store::LocalStore;
use tally_core::sync::{Resolution, ResolutionReport};

use crate::cli::{ConflictCommands, ConflictSide};
use crate::commands::common::{conflict_to_item, format_conflict_lines, CliContext, ConflictItem};
use crate::error::CliError;

pub async fn run_conflicts(command: ConflictCommands, context: &CliContext) -> Result<(), CliError> {
    match command {
        ConflictCommands::List { json } => {
            let conflicts = context.open_store()?.load_metadata().await?.pending_conflicts;
            if json {
                let items = conflicts.iter().map(conflict_to_item).collect::<Vec<ConflictItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if conflicts.is_empty() {
                println!("No sync conflicts pending.");
            } else {
                for line in format_conflict_lines(&conflicts) {
                    println!("{line}");
                }
            }
        }
        ConflictCommands::Resolve { key, choice, value } => {
            let resolution = resolution_from(choice.as_deref(), value)?;
            let (engine, _network) = context.engine()?;
            let key = key.trim().to_string();
            let choices = BTreeMap::from([(key.clone(), resolution)]);
            let report = engine.resolve_conflicts(&choices).await?;
            if report.unmatched.contains(&key) {
                return Err(CliError::ConflictNotFound(key));
            }
            print_resolution_report(&report);
            if let Some((key, reason)) = report.failed.first() {
                return Err(CliError::InvalidValue(format!("{key}: {reason}")));
            }
        }
        ConflictCommands::ResolveAll { keep } => {
            let (engine, _network) = context.engine()?;
            let report = match keep {
                ConflictSide::Remote => engine.resolve_all_conflicts(&BTreeMap::new()).await?,
                ConflictSide::Local => {
                    let choices = engine
                        .pending_conflicts()
                        .await?
                        .iter()
                        .map(|conflict| (conflict.key(), Resolution::UseLocal))
                        .collect();
                    engine.resolve_conflicts(&choices).await?
                }
            };
            print_resolution_report(&report);
        }
    }
    Ok(())
}

/// `local` and `remote` pick a side; anything else is a literal value.
pub fn parse_choice(choice: &str) -> Resolution {
    match choice.trim().to_ascii_lowercase().as_str() {
        "local" | "use-local" => Resolution::UseLocal,
        "remote" | "use-remote" => Resolution::UseRemote,
        _ => Resolution::Value(choice.trim().to_string()),
    }
}

/// `--value` bypasses the side keywords so a field can hold the text
/// `local` or `remote`.
pub fn resolution_from(choice: Option<&str>, value: Option<String>) -> Result<Resolution, CliError> {
    match (choice, value) {
        (_, Some(value)) => Ok(Resolution::Value(value)),
        (Some(choice), None) => Ok(parse_choice(choice)),
        (None, None) => Err(CliError::InvalidValue(
            "give `local`, `remote`, a value, or --value <VALUE>".to_string(),
        )),
    }
}

fn print_resolution_report(report: &ResolutionReport) {
    for applied in &report.applied {
        println!(
            "Resolved {} -> {} (now v{})",
            applied.key, applied.value, applied.version
        );
    }
    for (key, reason) in &report.failed {
        eprintln!("Could not resolve {key}: {reason}");
    }
    if report.remaining.is_empty() {
        println!("No conflicts remaining. Run `tally sync` to publish the decisions.");
    } else {
        println!("{} conflict(s) still pending.", report.remaining.len());
    }
}
