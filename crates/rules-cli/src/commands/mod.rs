//! Command handlers

pub mod config;
pub mod favorites;
pub mod feed;
pub mod vote;
pub mod watch;
pub mod whoami;

use anyhow::{bail, Result};

use rules_core::Rule;

/// Find a rule by feed rank (`3`, `03`) or id prefix
pub fn find_rule<'a>(rules: &'a [Rule], key: &str) -> Result<&'a Rule> {
    let key = key.trim();
    if key.is_empty() {
        bail!("Rule id must not be empty");
    }

    if let Some(rule) = rules.iter().find(|r| r.id == key) {
        return Ok(rule);
    }

    if key.chars().all(|c| c.is_ascii_digit()) && key.len() <= 3 {
        if let Ok(rank) = key.parse::<usize>() {
            if let Some(rule) = rank.checked_sub(1).and_then(|i| rules.get(i)) {
                return Ok(rule);
            }
        }
    }

    let matches: Vec<&Rule> = rules.iter().filter(|r| r.id.starts_with(key)).collect();
    match matches.as_slice() {
        [rule] => Ok(rule),
        [] => bail!("No rule matches '{}'", key),
        _ => bail!(
            "'{}' matches {} rules. Use a longer prefix.",
            key,
            matches.len()
        ),
    }
}
