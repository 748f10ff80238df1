use tally_core::models::Ledger;
use tally_core::util::normalize_text_option;

use crate::cli::LedgerCommands;
use crate::commands::common::{format_ledger_lines, ledger_to_item, CliContext, LedgerListItem};
use crate::error::CliError;

pub async fn run_ledger(command: LedgerCommands, context: &CliContext) -> Result<(), CliError> {
    let repo = context.repository()?;
    match command {
        LedgerCommands::Add {
            name,
            currency,
            description,
        } => {
            let mut ledger = Ledger::new(name.trim(), currency);
            ledger.description = normalize_text_option(description);
            let record = repo.create(ledger).await?;
            println!("{}", record.id);
        }
        LedgerCommands::List { all, json } => {
            let ledgers = repo.list::<Ledger>(None, all).await?;
            if json {
                let items = ledgers.iter().map(ledger_to_item).collect::<Vec<LedgerListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if ledgers.is_empty() {
                println!("No ledgers yet. Create one with `tally ledger add <name>`.");
            } else {
                for line in format_ledger_lines(&ledgers) {
                    println!("{line}");
                }
            }
        }
        LedgerCommands::Edit {
            id,
            name,
            description,
            currency,
            rate,
            archived,
        } => {
            let id = repo.resolve_id::<Ledger>(&id).await?;
            let record = repo
                .update::<Ledger>(&id, |ledger| {
                    if let Some(name) = normalize_text_option(name) {
                        ledger.name = name;
                    }
                    if let Some(description) = description {
                        ledger.description = normalize_text_option(Some(description));
                    }
                    if let Some(currency) = currency {
                        ledger.currency = currency.trim().to_ascii_uppercase();
                    }
                    if let Some(rate) = rate {
                        ledger.locked_exchange_rate = (rate > 0.0).then_some(rate);
                    }
                    if let Some(archived) = archived {
                        ledger.archived = archived;
                    }
                })
                .await?;
            println!("{}", record.id);
        }
        LedgerCommands::Delete { id } => {
            let id = repo.resolve_id::<Ledger>(&id).await?;
            let record = repo.delete::<Ledger>(&id).await?;
            println!("{}", record.id);
        }
    }
    Ok(())
}
