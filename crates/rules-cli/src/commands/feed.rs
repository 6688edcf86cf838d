//! Feed command handlers

use anyhow::Result;

use rules_core::SyncStore;

use crate::output::Output;

/// Fetch and print the ranked feed
pub async fn list(store: &SyncStore, output: &Output) -> Result<()> {
    if !store.is_enabled() {
        output.message(
            "No backend configured. Set one with:\n  \
             rules config set backend_url https://<project>.supabase.co\n  \
             rules config set backend_key <anon key>\n\
             or try the in-memory backend with `rules --memory`.",
        );
        return Ok(());
    }

    store.fetch_rules().await?;
    output.print_feed(&store.rules(), store.identity());
    Ok(())
}

/// Submit a new rule
pub async fn add(store: &SyncStore, text: String, output: &Output) -> Result<()> {
    if !store.add_rule(&text).await? {
        anyhow::bail!("Rule text must not be empty");
    }

    output.success("Rule added");
    if !output.is_quiet() && !output.is_json() {
        println!();
        output.print_feed(&store.rules(), store.identity());
    }
    Ok(())
}

/// Take back every vote of the current user
pub async fn clear(store: &SyncStore, output: &Output) -> Result<()> {
    store.fetch_rules().await?;
    let cleared = store.clear_votes().await?;

    if output.is_json() {
        println!("{}", serde_json::json!({"cleared": cleared}));
    } else if cleared == 0 {
        output.message("Nothing to clear.");
    } else {
        output.success(&format!("Cleared {} vote(s)", cleared));
    }
    Ok(())
}
