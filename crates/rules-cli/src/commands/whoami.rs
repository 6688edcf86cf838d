//! Identity command handler

use anyhow::Result;

use rules_core::{Config, Identity};

use crate::output::{Output, OutputFormat};

/// Show the device identity, creating it on first use
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let identity = Identity::with_config(config);
    let result = identity.load_or_create()?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "user_id": result.user_id.as_str(),
                    "path": identity.path(),
                    "is_new": result.is_new
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", result.user_id);
        }
        OutputFormat::Human => {
            if result.is_new {
                println!("Created new identity.");
                println!();
            }
            println!("User ID: {}", result.user_id);
            println!("Stored in: {}", identity.path().display());
        }
    }

    Ok(())
}
