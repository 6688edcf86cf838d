//! Data models
//!
//! Defines the backend rows (`Rule`, `Vote`) and their insert payloads.
//! `Rule::has_voted` is client-local: it is never sent to the backend and is
//! recomputed from the current user's votes on every fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend identifier of a rule
pub type RuleId = String;

/// A user-submitted rule with its upvote count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: RuleId,
    pub text: String,
    /// Identity of the submitter
    pub author: String,
    #[serde(default)]
    pub upvotes: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Whether the current user has voted on this rule
    #[serde(skip)]
    pub has_voted: bool,
}

impl Rule {
    /// Whether `user` wrote this rule
    pub fn is_authored_by(&self, user: &str) -> bool {
        self.author == user
    }

    /// Apply a vote or unvote to the local copy.
    ///
    /// Upvotes never go below zero.
    pub fn apply_vote(&mut self, voted: bool) {
        self.has_voted = voted;
        self.upvotes = if voted {
            self.upvotes.saturating_add(1)
        } else {
            self.upvotes.saturating_sub(1)
        };
    }
}

/// Insert payload for the `rules` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRule {
    pub text: String,
    pub author: String,
    pub upvotes: u32,
}

impl NewRule {
    /// Build a new rule, trimming the text.
    ///
    /// Returns `None` when the text is empty or whitespace only.
    pub fn new(text: &str, author: impl Into<String>) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            author: author.into(),
            upvotes: 0,
        })
    }
}

/// A vote linking one voter to one rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: String,
    pub rule_id: RuleId,
    pub voter: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the `votes` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewVote {
    pub rule_id: RuleId,
    pub voter: String,
}

/// Partial update of a rule's upvote count
#[derive(Debug, Clone, Serialize)]
pub struct UpvotePatch {
    pub upvotes: u32,
}

/// Zero-padded rank label as shown in the feed (`01`, `02`, ...)
pub fn rank_label(rank: usize) -> String {
    format!("{:02}", rank)
}
