use tally_core::models::Category;
use tally_core::util::normalize_text_option;

use crate::cli::CategoryCommands;
use crate::commands::common::{
    category_to_item, format_category_lines, CategoryListItem, CliContext,
};
use crate::error::CliError;

pub async fn run_category(command: CategoryCommands, context: &CliContext) -> Result<(), CliError> {
    let repo = context.repository()?;
    match command {
        CategoryCommands::Add {
            name,
            color,
            icon,
            description,
        } => {
            let mut category = Category::new(name.trim());
            category.color = normalize_text_option(color);
            category.icon = normalize_text_option(icon);
            category.description = normalize_text_option(description);
            let record = repo.create(category).await?;
            println!("{}", record.id);
        }
        CategoryCommands::List { all, json } => {
            let mut categories = repo.list::<Category>(None, all).await?;
            categories.sort_by(|a, b| a.data.name.to_lowercase().cmp(&b.data.name.to_lowercase()));
            if json {
                let items = categories
                    .iter()
                    .map(category_to_item)
                    .collect::<Vec<CategoryListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_category_lines(&categories) {
                    println!("{line}");
                }
            }
        }
        CategoryCommands::Delete { id } => {
            let id = repo.resolve_id::<Category>(&id).await?;
            let record = repo.delete::<Category>(&id).await?;
            println!("{}", record.id);
        }
    }
    Ok(())
}
