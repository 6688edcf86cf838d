//! Rules to Live By core library
//!
//! A community feed of short user-submitted rules. Anyone can add a rule
//! and vote on other people's rules; the feed is ranked by upvotes.
//!
//! # Architecture
//!
//! - **Gateway**: stateless facade over the hosted backend (REST plus a
//!   realtime change channel), with in-memory and disabled variants
//! - **SyncStore**: local feed with optimistic votes, rollback on failure,
//!   and delayed reconciliation
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let identity = Identity::with_config(&config).load_or_create()?;
//! let gateway = Arc::new(RestGateway::new(url, key, config.request_timeout())?);
//! let store = SyncStore::new(gateway, Some(identity.user_id), StoreOptions::from_config(&config));
//!
//! store.fetch_rules().await?;
//! store.toggle_vote(&rule_id).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: local sync state (main entry point)
//! - `gateway`: backend access
//! - `models`: rule and vote rows
//! - `identity`: anonymous per-device identity
//! - `export`: favorites as text
//! - `config`: application configuration

pub mod config;
pub mod export;
pub mod gateway;
pub mod identity;
pub mod models;
pub mod store;

pub use config::Config;
pub use export::{ExportError, ExportFormat};
pub use gateway::{DisabledGateway, Gateway, GatewayError, MemoryGateway, RestGateway};
pub use identity::{Identity, InitResult, UserId};
pub use models::{Rule, RuleId, Vote};
pub use store::{Feed, StoreError, StoreOptions, SyncStore, VoteChange, WatchHandle};
