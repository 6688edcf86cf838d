//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use rules_core::models::rank_label;
use rules_core::{Rule, UserId};
use serde_json::{json, Value};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print the ranked feed
    pub fn print_feed(&self, rules: &[Rule], user: Option<&UserId>) {
        match self.format {
            OutputFormat::Human => {
                if rules.is_empty() {
                    println!("No rules yet. Add one with `rules add <TEXT>`.");
                    return;
                }
                for (i, rule) in rules.iter().enumerate() {
                    println!("{}", feed_line(i + 1, rule, user));
                }
                let voted = rules.iter().filter(|r| r.has_voted).count();
                println!("\n{} rule(s), {} voted", rules.len(), voted);
            }
            OutputFormat::Json => {
                let rows: Vec<Value> = rules
                    .iter()
                    .enumerate()
                    .map(|(i, rule)| rule_json(i + 1, rule, user))
                    .collect();
                println!("{}", Value::Array(rows));
            }
            OutputFormat::Quiet => {
                for rule in rules {
                    println!("{}", rule.id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One human-readable feed row: `01  ▲  12 ★ text  (yours)  [id]`
fn feed_line(rank: usize, rule: &Rule, user: Option<&UserId>) -> String {
    let mark = if rule.has_voted { "★" } else { " " };
    let own = match user {
        Some(user) if rule.is_authored_by(user.as_str()) => "  (yours)",
        _ => "",
    };
    format!(
        "{}  ▲ {:>3} {} {}{}  [{}]",
        rank_label(rank),
        rule.upvotes,
        mark,
        truncate(&rule.text, 60),
        own,
        short_id(&rule.id)
    )
}

pub fn rule_json(rank: usize, rule: &Rule, user: Option<&UserId>) -> Value {
    json!({
        "rank": rank,
        "id": rule.id,
        "text": rule.text,
        "author": rule.author,
        "upvotes": rule.upvotes,
        "created_at": rule.created_at,
        "has_voted": rule.has_voted,
        "is_own": user.is_some_and(|u| rule.is_authored_by(u.as_str())),
    })
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(id: &str, author: &str, voted: bool) -> Rule {
        Rule {
            id: id.to_string(),
            text: "Be kind".to_string(),
            author: author.to_string(),
            upvotes: 12,
            created_at: Utc::now(),
            has_voted: voted,
        }
    }

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("r1"), "r1");
    }

    #[test]
    fn test_feed_line_marks() {
        let me = UserId::parse("alice");

        let line = feed_line(1, &rule("0123456789", "bob", true), me.as_ref());
        assert_eq!(line, "01  ▲  12 ★ Be kind  [01234567]");

        let line = feed_line(12, &rule("r2", "alice", false), me.as_ref());
        assert_eq!(line, "12  ▲  12   Be kind  (yours)  [r2]");
    }

    #[test]
    fn test_rule_json_includes_local_flags() {
        let me = UserId::parse("alice");
        let value = rule_json(3, &rule("r1", "alice", true), me.as_ref());
        assert_eq!(value["rank"], 3);
        assert_eq!(value["has_voted"], true);
        assert_eq!(value["is_own"], true);
    }
}
