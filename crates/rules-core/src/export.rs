//! Favorites export
//!
//! Renders the rules a user voted for as a shareable plain-text list:
//!
//! ```text
//! RULES TO LIVE BY - 2025
//!
//! 1. Be kind
//!
//! 2. Drink water
//!
//! ---
//! rulestolive.by
//! ```
//!
//! The share variant drops the trailing footer.

use std::str::FromStr;

use chrono::{Datelike, Utc};
use thiserror::Error;

use crate::models::Rule;

const TITLE: &str = "RULES TO LIVE BY";
const FOOTER: &str = "---\nrulestolive.by";

/// Export flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Clipboard text with the site footer
    #[default]
    Text,
    /// Share-sheet text, no footer
    Share,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ExportFormat::Text),
            "share" => Ok(ExportFormat::Share),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ExportError {
    #[error("No favorites yet. Vote on some rules first.")]
    NoFavorites,

    #[error("Unknown export format '{0}' (expected text or share)")]
    UnknownFormat(String),
}

/// Render `favorites` for the current year
pub fn render(favorites: &[Rule], format: ExportFormat) -> Result<String, ExportError> {
    render_for_year(favorites, format, Utc::now().year())
}

/// Render `favorites` in the given order under a `year` heading
pub fn render_for_year(
    favorites: &[Rule],
    format: ExportFormat,
    year: i32,
) -> Result<String, ExportError> {
    if favorites.is_empty() {
        return Err(ExportError::NoFavorites);
    }

    let body = favorites
        .iter()
        .enumerate()
        .map(|(i, rule)| format!("{}. {}", i + 1, rule.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut out = format!("{} - {}\n\n{}", TITLE, year, body);
    if format == ExportFormat::Text {
        out.push_str("\n\n");
        out.push_str(FOOTER);
    }
    Ok(out)
}
