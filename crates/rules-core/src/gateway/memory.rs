//! In-process backend
//!
//! Holds the `rules` and `votes` tables in memory and behaves like the
//! hosted backend: server-assigned ids and timestamps, stable insertion
//! order for ties, a uniqueness constraint on `(rule_id, voter)`, and a
//! change feed. Also records every call and can inject failures, which the
//! sync store tests rely on.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::{
    ChangeNotice, Filter, Gateway, GatewayError, GatewayResult, Order, Record, Resource,
    Subscription,
};

/// Kind of gateway call, for the call journal and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    Insert,
    Update,
    Delete,
}

#[derive(Default)]
struct Tables {
    rules: Vec<Record>,
    votes: Vec<Record>,
    journal: Vec<(Operation, Resource)>,
    journaling: bool,
    failures: HashMap<(Operation, Resource), GatewayError>,
    offline: bool,
}

impl Tables {
    fn rows(&self, resource: Resource) -> &Vec<Record> {
        match resource {
            Resource::Rules => &self.rules,
            Resource::Votes => &self.votes,
        }
    }

    fn rows_mut(&mut self, resource: Resource) -> &mut Vec<Record> {
        match resource {
            Resource::Rules => &mut self.rules,
            Resource::Votes => &mut self.votes,
        }
    }
}

/// In-memory implementation of [`Gateway`]
pub struct MemoryGateway {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<ChangeNotice>,
    latency: Mutex<Option<Duration>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            tables: Mutex::new(Tables {
                journaling: true,
                ..Tables::default()
            }),
            changes,
            latency: Mutex::new(None),
        }
    }

    /// Stop recording calls, for long-running use outside tests
    pub fn without_journal(self) -> Self {
        {
            let mut tables = self.lock();
            tables.journaling = false;
            tables.journal.clear();
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a rule directly, returning its id
    pub fn seed_rule(&self, text: &str, author: &str, upvotes: u32) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().rules.push(json!({
            "id": id,
            "text": text,
            "author": author,
            "upvotes": upvotes,
            "created_at": Utc::now(),
        }));
        id
    }

    /// Insert a vote directly (does not touch the rule's count)
    pub fn seed_vote(&self, rule_id: &str, voter: &str) {
        self.lock().votes.push(json!({
            "id": Uuid::new_v4().to_string(),
            "rule_id": rule_id,
            "voter": voter,
            "created_at": Utc::now(),
        }));
    }

    /// Snapshot of a table
    pub fn rows(&self, resource: Resource) -> Vec<Record> {
        self.lock().rows(resource).clone()
    }

    /// Every call made so far, in order
    pub fn journal(&self) -> Vec<(Operation, Resource)> {
        self.lock().journal.clone()
    }

    /// Number of calls of one kind on one resource
    pub fn count_calls(&self, operation: Operation, resource: Resource) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|entry| **entry == (operation, resource))
            .count()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Make the next `operation` on `resource` fail with `error`
    pub fn fail_next(&self, operation: Operation, resource: Resource, error: GatewayError) {
        self.lock().failures.insert((operation, resource), error);
    }

    /// Fail every call with `Unavailable` while set
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    async fn begin(&self, operation: Operation, resource: Resource) -> GatewayResult<()> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut tables = self.lock();
        if tables.journaling {
            tables.journal.push((operation, resource));
        }
        if tables.offline {
            return Err(GatewayError::Unavailable("memory backend offline".to_string()));
        }
        if let Some(error) = tables.failures.remove(&(operation, resource)) {
            return Err(error);
        }
        Ok(())
    }

    fn notify(&self, resource: Resource) {
        // No receivers is fine
        let _ = self.changes.send(ChangeNotice { resource });
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn query(
        &self,
        resource: Resource,
        filter: Filter,
        order: Option<Order>,
    ) -> GatewayResult<Vec<Record>> {
        self.begin(Operation::Query, resource).await?;

        let mut rows: Vec<Record> = self
            .lock()
            .rows(resource)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();

        // sort_by is stable, so ties keep insertion order
        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        Ok(rows)
    }

    async fn insert(&self, resource: Resource, record: Record) -> GatewayResult<Record> {
        self.begin(Operation::Insert, resource).await?;

        let Value::Object(mut row) = record else {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "record must be a JSON object".to_string(),
            });
        };
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at")
            .or_insert_with(|| json!(Utc::now()));
        let row = Value::Object(row);

        {
            let mut tables = self.lock();
            if resource == Resource::Votes {
                let key = Filter::new()
                    .eq("rule_id", row.get("rule_id").cloned().unwrap_or(Value::Null))
                    .eq("voter", row.get("voter").cloned().unwrap_or(Value::Null));
                if tables.votes.iter().any(|vote| key.matches(vote)) {
                    return Err(GatewayError::Conflict(
                        "duplicate key value violates unique constraint \"votes_rule_id_voter_key\""
                            .to_string(),
                    ));
                }
            }
            tables.rows_mut(resource).push(row.clone());
        }

        debug!("memory insert into {}", resource);
        self.notify(resource);
        Ok(row)
    }

    async fn update(&self, resource: Resource, id: &str, patch: Record) -> GatewayResult<Record> {
        self.begin(Operation::Update, resource).await?;

        let updated = {
            let mut tables = self.lock();
            let row = tables
                .rows_mut(resource)
                .iter_mut()
                .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
                .ok_or_else(|| GatewayError::NotFound {
                    resource,
                    id: id.to_string(),
                })?;

            if let (Value::Object(row), Value::Object(patch)) = (&mut *row, patch) {
                for (key, value) in patch {
                    row.insert(key, value);
                }
            }
            row.clone()
        };

        self.notify(resource);
        Ok(updated)
    }

    async fn delete(&self, resource: Resource, filter: Filter) -> GatewayResult<u64> {
        self.begin(Operation::Delete, resource).await?;

        let removed = {
            let mut tables = self.lock();
            let rows = tables.rows_mut(resource);
            let before = rows.len();
            rows.retain(|row| !filter.matches(row));
            (before - rows.len()) as u64
        };

        if removed > 0 {
            self.notify(resource);
        }
        Ok(removed)
    }

    async fn subscribe_changes(&self, resources: &[Resource]) -> GatewayResult<Subscription> {
        let mut changes = self.changes.subscribe();
        let resources = resources.to_vec();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                let notice = match changes.recv().await {
                    Ok(notice) if resources.contains(&notice.resource) => notice,
                    Ok(_) => continue,
                    // Missed notices still mean something changed
                    Err(broadcast::error::RecvError::Lagged(_)) => ChangeNotice {
                        resource: resources.first().copied().unwrap_or(Resource::Rules),
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(notice).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}
