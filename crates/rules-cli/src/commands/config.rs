//! Config command handlers

use anyhow::{Context, Result};

use rules_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "backend_url": config.backend_url,
                    "backend_key": config.backend_key.as_deref().map(mask),
                    "realtime": config.realtime,
                    "reconcile_delay_ms": config.reconcile_delay_ms,
                    "change_debounce_ms": config.change_debounce_ms,
                    "request_timeout_secs": config.request_timeout_secs,
                    "log_level": config.log_level,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let not_set = || "(not set)".to_string();
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  backend_url:          {}",
                config.backend_url.clone().unwrap_or_else(not_set)
            );
            println!(
                "  backend_key:          {}",
                config.backend_key.as_deref().map(mask).unwrap_or_else(not_set)
            );
            println!("  realtime:             {}", config.realtime);
            println!("  reconcile_delay_ms:   {}", config.reconcile_delay_ms);
            println!("  change_debounce_ms:   {}", config.change_debounce_ms);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!("  log_level:            {}", config.log_level);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(not_set)
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.set_value(&key, &value)?;
    config.save()?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Hide all but the last four characters of a secret
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}
