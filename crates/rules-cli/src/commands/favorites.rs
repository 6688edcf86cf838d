//! Favorites export handler

use anyhow::Result;

use rules_core::export::{self, ExportFormat};
use rules_core::SyncStore;

use crate::output::{rule_json, Output, OutputFormat};

/// Print the user's voted rules as shareable text
pub async fn print(store: &SyncStore, format: ExportFormat, output: &Output) -> Result<()> {
    store.fetch_rules().await?;
    let favorites = store.favorites();

    match output.format {
        OutputFormat::Json => {
            let rows: Vec<_> = favorites
                .iter()
                .enumerate()
                .map(|(i, rule)| rule_json(i + 1, rule, store.identity()))
                .collect();
            println!("{}", serde_json::Value::Array(rows));
        }
        OutputFormat::Quiet | OutputFormat::Human => {
            println!("{}", export::render(&favorites, format)?);
        }
    }

    Ok(())
}
