//! Remote store gateway
//!
//! A stateless facade over the hosted backend. The backend exposes two
//! tables (`rules`, `votes`) through generic query/insert/update/delete
//! calls plus a change-notification channel.
//!
//! ## Implementations
//!
//! - [`RestGateway`]: PostgREST over HTTP, realtime over websocket
//! - [`MemoryGateway`]: in-process tables, used for tests and local demos
//! - [`DisabledGateway`]: no backend configured, every call is a no-op
//!
//! Change notifications carry no payload. A receiver must re-query to
//! learn what changed.

mod disabled;
mod error;
mod memory;
pub mod realtime;
mod rest;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use disabled::DisabledGateway;
pub use error::{GatewayError, GatewayResult};
pub use memory::{MemoryGateway, Operation};
pub use rest::RestGateway;

/// A backend row as a JSON object
pub type Record = Value;

/// Logical backend resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Rules,
    Votes,
}

impl Resource {
    /// Backend table name
    pub fn table(&self) -> &'static str {
        match self {
            Resource::Rules => "rules",
            Resource::Votes => "votes",
        }
    }

    /// Look up a resource by table name
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "rules" => Some(Resource::Rules),
            "votes" => Some(Resource::Votes),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Conjunction of column equality conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column == value`
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((column.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether a record satisfies every condition
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| record.get(column) == Some(value))
    }
}

/// Sort order for a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// Notification that some row in `resource` changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotice {
    pub resource: Resource,
}

/// Handle to a change subscription
///
/// Notices arrive at least once and may be duplicated. Dropping the
/// handle stops the background listener.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeNotice>,
    task: Option<JoinHandle<()>>,
    // Keeps an idle subscription open
    _idle_tx: Option<mpsc::UnboundedSender<ChangeNotice>>,
}

impl Subscription {
    /// Wrap a receiver fed by a background task
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeNotice>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
            _idle_tx: None,
        }
    }

    /// A subscription that never fires
    pub fn idle() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            task: None,
            _idle_tx: Some(tx),
        }
    }

    /// Wait for the next notice. Returns `None` once the listener stops.
    pub async fn next(&mut self) -> Option<ChangeNotice> {
        self.rx.recv().await
    }

    /// Stop the listener now rather than at drop
    pub fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Capability set of the hosted backend
#[async_trait]
pub trait Gateway: Send + Sync {
    /// False when no backend is configured
    fn is_enabled(&self) -> bool {
        true
    }

    /// Read records matching `filter`, sorted by `order` if given
    async fn query(
        &self,
        resource: Resource,
        filter: Filter,
        order: Option<Order>,
    ) -> GatewayResult<Vec<Record>>;

    /// Create one record and return it as stored
    async fn insert(&self, resource: Resource, record: Record) -> GatewayResult<Record>;

    /// Partially update the record with primary key `id`
    async fn update(&self, resource: Resource, id: &str, patch: Record) -> GatewayResult<Record>;

    /// Delete every record matching `filter`, returning how many went away
    async fn delete(&self, resource: Resource, filter: Filter) -> GatewayResult<u64>;

    /// Subscribe to change notices for `resources`
    async fn subscribe_changes(&self, resources: &[Resource]) -> GatewayResult<Subscription>;
}
