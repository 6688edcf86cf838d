//! Live feed handler

use anyhow::Result;
use tracing::info;

use rules_core::SyncStore;

use crate::output::{Output, OutputFormat};

/// Print the feed, then reprint it whenever it changes until Ctrl-C
pub async fn run(store: &SyncStore, output: &Output) -> Result<()> {
    store.fetch_rules().await?;
    let _watch = store.watch_changes().await?;
    info!("Watching for changes");

    let mut feed = store.subscribe();
    let mut shown = {
        let current = feed.borrow_and_update();
        output.print_feed(&current.rules, store.identity());
        current.revision
    };

    if output.format == OutputFormat::Human {
        println!("\nWatching for changes (Ctrl-C to stop)...");
    }

    loop {
        tokio::select! {
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = feed.borrow_and_update().clone();
                if current.loading || current.revision == shown {
                    continue;
                }
                shown = current.revision;

                if output.format == OutputFormat::Human {
                    println!("\n── {} ──", chrono::Local::now().format("%H:%M:%S"));
                }
                output.print_feed(&current.rules, store.identity());
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}
