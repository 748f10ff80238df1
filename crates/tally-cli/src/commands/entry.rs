use chrono::Utc;
use tally_core::db::Repository;
use tally_core::models::{Category, Entry, Ledger, PaymentMode};
use tally_core::store::LocalStore;
use tally_core::util::normalize_text_option;
use tally_core::RecordId;

use crate::cli::EntryCommands;
use crate::commands::common::{
    entry_to_item, format_entry_lines, parse_amount, parse_date, CliContext, EntryListItem,
};
use crate::error::CliError;

pub async fn run_entry(command: EntryCommands, context: &CliContext) -> Result<(), CliError> {
    let repo = context.repository()?;
    match command {
        EntryCommands::Add {
            ledger,
            amount,
            counterparty,
            category,
            mode,
            date,
            remarks,
            tags,
        } => {
            let ledger_id = live_ledger(&repo, &ledger).await?;
            let date = date.as_deref().map(parse_date).transpose()?.unwrap_or_else(Utc::now);
            let mut entry = Entry::new(ledger_id, parse_amount(&amount)?, counterparty.trim(), date);
            entry.category_id = match category {
                Some(category) => Some(live_category(&repo, &category).await?),
                None => None,
            };
            entry.payment_mode = parse_mode(&mode)?;
            entry.remarks = normalize_text_option(remarks);
            entry.tags = normalize_tags(tags);

            let record = repo.create(entry).await?;
            println!("{}", record.id);
        }
        EntryCommands::List {
            ledger,
            limit,
            json,
        } => {
            let ledger_id = repo.resolve_id::<Ledger>(&ledger).await?;
            let mut entries = repo.list::<Entry>(Some(&ledger_id), false).await?;
            entries.sort_by(|a, b| b.data.date.cmp(&a.data.date).then(b.id.cmp(&a.id)));
            entries.truncate(limit);

            if json {
                let items = entries.iter().map(entry_to_item).collect::<Vec<EntryListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_entry_lines(&entries) {
                    println!("{line}");
                }
            }
        }
        EntryCommands::Edit {
            id,
            amount,
            counterparty,
            category,
            mode,
            date,
            remarks,
        } => {
            let id = repo.resolve_id::<Entry>(&id).await?;
            let amount = amount.as_deref().map(parse_amount).transpose()?;
            let date = date.as_deref().map(parse_date).transpose()?;
            let mode = mode.as_deref().map(parse_mode).transpose()?;
            let category = match category.as_deref().map(str::trim) {
                Some("none" | "") => Some(None),
                Some(category) => Some(Some(live_category(&repo, category).await?)),
                None => None,
            };

            let record = repo
                .update::<Entry>(&id, |entry| {
                    if let Some(amount) = amount {
                        entry.amount = amount;
                    }
                    if let Some(counterparty) = normalize_text_option(counterparty) {
                        entry.counterparty = counterparty;
                    }
                    if let Some(category) = category {
                        entry.category_id = category;
                    }
                    if let Some(mode) = mode {
                        entry.payment_mode = mode;
                    }
                    if let Some(date) = date {
                        entry.date = date;
                    }
                    if let Some(remarks) = remarks {
                        entry.remarks = normalize_text_option(Some(remarks));
                    }
                })
                .await?;
            println!("{}", record.id);
        }
        EntryCommands::Delete { id } => {
            let id = repo.resolve_id::<Entry>(&id).await?;
            let record = repo.delete::<Entry>(&id).await?;
            println!("{}", record.id);
        }
    }
    Ok(())
}

async fn live_ledger<L: LocalStore>(repo: &Repository<L>, id: &str) -> Result<RecordId, CliError> {
    let id = repo.resolve_id::<Ledger>(id).await?;
    match repo.get::<Ledger>(&id).await? {
        Some(ledger) if ledger.data.archived => Err(CliError::InvalidValue(format!(
            "ledger '{}' is archived",
            ledger.data.name
        ))),
        Some(_) => Ok(id),
        None => Err(tally_core::Error::NotFound(format!("ledgers {id}")).into()),
    }
}

async fn live_category<L: LocalStore>(
    repo: &Repository<L>,
    id: &str,
) -> Result<RecordId, CliError> {
    let id = repo.resolve_id::<Category>(id).await?;
    if repo.get::<Category>(&id).await?.is_none() {
        return Err(tally_core::Error::NotFound(format!("categories {id}")).into());
    }
    Ok(id)
}

pub fn parse_mode(value: &str) -> Result<PaymentMode, CliError> {
    value.parse::<PaymentMode>().map_err(CliError::InvalidValue)
}

pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags = tags
        .into_iter()
        .filter_map(|tag| {
            let tag = tag.trim().trim_start_matches('#').to_lowercase();
            (!tag.is_empty()).then_some(tag)
        })
        .collect::<Vec<_>>();
    tags.sort();
    tags.dedup();
    tags
}
