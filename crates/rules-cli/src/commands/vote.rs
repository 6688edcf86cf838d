//! Vote command handler

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use rules_core::{Feed, StoreOptions, SyncStore};

use crate::commands::find_rule;
use crate::output::{rule_json, short_id, Output, OutputFormat};

/// Toggle the vote on a rule and report where it settles
pub async fn toggle(
    store: &SyncStore,
    key: String,
    options: &StoreOptions,
    request_timeout: Duration,
    output: &Output,
) -> Result<()> {
    store.fetch_rules().await?;
    let rules = store.rules();
    let rule = find_rule(&rules, &key)?;
    let before = rank_of(store, &rule.id);

    if store.identity().is_some_and(|u| rule.is_authored_by(u.as_str())) {
        anyhow::bail!("You can't vote on your own rule");
    }

    let Some(change) = store.toggle_vote(&rule.id).await? else {
        anyhow::bail!("Vote on {} was not applied", short_id(&rule.id));
    };
    let mut feed = store.subscribe();
    let baseline = feed.borrow_and_update().revision;

    // The feed re-sorts once the reconciliation fetch lands
    let settle = options.reconcile_delay + request_timeout * 2;
    let settled = tokio::time::timeout(settle, wait_for_fetch(&mut feed, baseline))
        .await
        .is_ok();
    let after = rank_of(store, &rule.id);

    match output.format {
        OutputFormat::Json => {
            let rule = store.rule(&change.rule_id);
            println!(
                "{}",
                serde_json::json!({
                    "rule_id": change.rule_id,
                    "has_voted": change.has_voted,
                    "upvotes": change.upvotes,
                    "rank_before": before,
                    "rank_after": after,
                    "settled": settled,
                    "rule": rule.map(|r| rule_json(after.unwrap_or_default(), &r, store.identity())),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", change.upvotes);
        }
        OutputFormat::Human => {
            let verb = if change.has_voted { "Voted for" } else { "Removed vote from" };
            output.success(&format!(
                "{} \"{}\" ({} upvotes)",
                verb, rule.text, change.upvotes
            ));
            match (before, after) {
                (Some(b), Some(a)) if a != b => println!("  Moved from #{} to #{}", b, a),
                (_, Some(a)) => println!("  Stays at #{}", a),
                _ => {}
            }
            if !settled {
                println!("  (feed not refreshed yet)");
            }
        }
    }

    Ok(())
}

/// 1-based position of a rule in the local feed
fn rank_of(store: &SyncStore, rule_id: &str) -> Option<usize> {
    store
        .rules()
        .iter()
        .position(|r| r.id == rule_id)
        .map(|i| i + 1)
}

/// Wait until a fetch newer than `baseline` has been applied
async fn wait_for_fetch(feed: &mut watch::Receiver<Feed>, baseline: u64) {
    while feed.changed().await.is_ok() {
        let current = feed.borrow_and_update();
        if current.revision > baseline && !current.loading {
            return;
        }
    }
}
