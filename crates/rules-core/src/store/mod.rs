//! Client sync state
//!
//! `SyncStore` owns the in-memory rule feed and the current identity, and
//! keeps the feed in line with the backend:
//!
//! - **Optimistic update**: a vote is applied to the local feed before the
//!   backend write is issued. The feed is not re-sorted at this point.
//! - **Reconciliation**: after a vote, a full re-fetch runs once the
//!   reconcile delay (2 s by default) has passed. This is the only point at
//!   which the feed re-orders. Further votes inside the window push the
//!   fetch back.
//! - **Rollback**: a failed backend write restores the local rule and the
//!   error is returned to the caller.
//!
//! Presentation observes the feed through [`SyncStore::subscribe`].
//!
//! ## Usage
//!
//! ```ignore
//! let store = SyncStore::new(gateway, Some(user_id), StoreOptions::default());
//! store.fetch_rules().await?;
//! store.toggle_vote(&rule_id).await?;
//! ```

mod error;
mod reconcile;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use error::{StoreError, StoreResult};

use crate::config::Config;
use crate::gateway::{Filter, Gateway, Order, Record, Resource};
use crate::identity::UserId;
use crate::models::{NewRule, NewVote, Rule, RuleId, UpvotePatch, Vote};
use reconcile::{Reconcile, Reconciler};

/// Timing knobs for the store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Delay between a vote and the re-sorting fetch
    pub reconcile_delay: Duration,
    /// Coalescing window for realtime change notices
    pub change_debounce: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reconcile_delay: Duration::from_secs(2),
            change_debounce: Duration::from_millis(250),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconcile_delay: config.reconcile_delay(),
            change_debounce: config.change_debounce(),
        }
    }
}

/// Snapshot of the local feed
#[derive(Debug, Clone, Default)]
pub struct Feed {
    /// Rules in display order
    pub rules: Vec<Rule>,
    /// A fetch is in flight
    pub loading: bool,
    /// Bumped on every change to `rules`
    pub revision: u64,
}

/// Result of a successful vote toggle, as applied locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteChange {
    pub rule_id: RuleId,
    pub has_voted: bool,
    pub upvotes: u32,
}

/// Guard-check outcome of the optimistic step
struct PendingVote {
    previous_upvotes: u32,
    previous_voted: bool,
    change: VoteChange,
}

struct Inner {
    gateway: Arc<dyn Gateway>,
    identity: Option<UserId>,
    options: StoreOptions,
    feed: watch::Sender<Feed>,
    /// Generation of the most recently started fetch
    fetch_started: AtomicU64,
    /// Generation of the fetch whose result is currently shown
    fetch_applied: AtomicU64,
    /// Rules with a vote write in flight
    writing: Mutex<HashSet<RuleId>>,
    reconciler: Reconciler,
}

/// Local rule feed synced with a [`Gateway`]
///
/// Cheap to clone; clones share the same feed.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<Inner>,
}

impl SyncStore {
    /// Build a store around `gateway`.
    ///
    /// Spawns the reconciliation task, so it must be called from within a
    /// tokio runtime.
    pub fn new(gateway: Arc<dyn Gateway>, identity: Option<UserId>, options: StoreOptions) -> Self {
        let (feed, _) = watch::channel(Feed::default());
        let inner = Arc::new_cyclic(|weak| Inner {
            gateway,
            identity,
            options,
            feed,
            fetch_started: AtomicU64::new(0),
            fetch_applied: AtomicU64::new(0),
            writing: Mutex::new(HashSet::new()),
            reconciler: Reconciler::spawn(weak.clone()),
        });
        Self { inner }
    }

    /// Whether a backend is configured
    pub fn is_enabled(&self) -> bool {
        self.inner.gateway.is_enabled()
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.inner.identity.as_ref()
    }

    /// Observe feed changes
    pub fn subscribe(&self) -> watch::Receiver<Feed> {
        self.inner.feed.subscribe()
    }

    /// Rules in display order
    pub fn rules(&self) -> Vec<Rule> {
        self.inner.feed.borrow().rules.clone()
    }

    pub fn rule(&self, rule_id: &str) -> Option<Rule> {
        self.inner
            .feed
            .borrow()
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.feed.borrow().loading
    }

    /// Rules the current user voted for, in feed order
    pub fn favorites(&self) -> Vec<Rule> {
        self.inner
            .feed
            .borrow()
            .rules
            .iter()
            .filter(|r| r.has_voted)
            .cloned()
            .collect()
    }

    /// Replace the local feed with the backend's rules, sorted by upvotes.
    pub async fn fetch_rules(&self) -> StoreResult<()> {
        self.inner.fetch_rules().await
    }

    /// Submit a new rule.
    ///
    /// Returns `false` without contacting the backend when there is no
    /// identity or the text is blank.
    pub async fn add_rule(&self, text: &str) -> StoreResult<bool> {
        let inner = &self.inner;
        inner.ensure_enabled()?;

        let Some(user) = &inner.identity else {
            debug!("add_rule ignored: no identity");
            return Ok(false);
        };
        let Some(new_rule) = NewRule::new(text, user.as_str()) else {
            debug!("add_rule ignored: blank text");
            return Ok(false);
        };

        let record = to_record(Resource::Rules, &new_rule)?;
        inner.gateway.insert(Resource::Rules, record).await?;
        info!("Added rule by {}", user);

        inner.fetch_rules().await?;
        Ok(true)
    }

    /// Vote for a rule, or take the vote back.
    ///
    /// Returns `None` (nothing happens) when the rule is not in the local
    /// feed, the current user wrote it, there is no identity, or a vote on
    /// the same rule is still being written.
    pub async fn toggle_vote(&self, rule_id: &str) -> StoreResult<Option<VoteChange>> {
        let inner = &self.inner;
        inner.ensure_enabled()?;

        let Some(user) = inner.identity.clone() else {
            return Ok(None);
        };
        let Some(pending) = inner.apply_optimistic_vote(rule_id, &user) else {
            return Ok(None);
        };
        // Held until the write settles, or until this future is dropped
        let _write = WriteGuard {
            inner: inner.as_ref(),
            rule_id,
        };

        let change = &pending.change;
        let result = inner
            .write_vote(&user, rule_id, change.has_voted, change.upvotes)
            .await;

        if let Err(e) = &result {
            warn!("Vote on {} failed, rolling back: {}", rule_id, e);
            inner.rollback_vote(&pending);
        }

        result.map(|()| Some(pending.change))
    }

    /// Take back every vote of the current user.
    ///
    /// Returns the number of votes cleared. Issues no backend calls when
    /// nothing is voted.
    pub async fn clear_votes(&self) -> StoreResult<usize> {
        let inner = &self.inner;
        inner.ensure_enabled()?;

        let Some(user) = inner.identity.clone() else {
            return Ok(0);
        };

        let mut cleared: Vec<(RuleId, u32)> = Vec::new();
        inner.feed.send_if_modified(|feed| {
            for rule in feed.rules.iter_mut().filter(|r| r.has_voted) {
                rule.apply_vote(false);
                cleared.push((rule.id.clone(), rule.upvotes));
            }
            if cleared.is_empty() {
                return false;
            }
            feed.revision += 1;
            true
        });

        if cleared.is_empty() {
            return Ok(0);
        }

        // The closing fetch below supersedes any pending reconciliation
        inner.reconciler.cancel();

        for (index, (rule_id, upvotes)) in cleared.iter().enumerate() {
            if let Err(e) = inner.write_vote(&user, rule_id, false, *upvotes).await {
                warn!("Clearing vote on {} failed: {}", rule_id, e);
                inner.restore_votes(&cleared[index..]);
                if let Err(fetch_err) = inner.fetch_rules().await {
                    warn!("Refresh after failed clear also failed: {}", fetch_err);
                }
                return Err(e);
            }
        }

        info!("Cleared {} votes", cleared.len());
        inner.fetch_rules().await?;
        Ok(cleared.len())
    }

    /// Re-fetch whenever the backend reports a change to rules or votes.
    ///
    /// Notices are coalesced over the change debounce window and never cut
    /// a pending post-vote delay short. Stops when the handle is dropped.
    pub async fn watch_changes(&self) -> StoreResult<WatchHandle> {
        self.inner.ensure_enabled()?;

        let mut subscription = self
            .inner
            .gateway
            .subscribe_changes(&[Resource::Rules, Resource::Votes])
            .await?;
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(notice) = subscription.next().await {
                let Some(inner) = weak.upgrade() else {
                    subscription.unsubscribe();
                    break;
                };
                debug!("Change on {}, scheduling refresh", notice.resource);
                inner.reconciler.nudge(inner.options.change_debounce);
            }
        });

        Ok(WatchHandle { task })
    }
}

/// Marks a rule as having a vote write in flight.
///
/// Dropping it releases the rule and schedules reconciliation, also when the
/// toggle is cancelled mid-write and its optimistic change never settled.
struct WriteGuard<'a> {
    inner: &'a Inner,
    rule_id: &'a str,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.inner.finish_write(self.rule_id);
    }
}

/// Keeps a realtime watch alive
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Inner {
    fn ensure_enabled(&self) -> StoreResult<()> {
        if self.gateway.is_enabled() {
            Ok(())
        } else {
            Err(StoreError::Disabled)
        }
    }

    async fn fetch_rules(&self) -> StoreResult<()> {
        self.ensure_enabled()?;

        let generation = self.fetch_started.fetch_add(1, Ordering::SeqCst) + 1;
        self.feed.send_modify(|feed| feed.loading = true);

        let result = self.load_rules().await;
        let latest = self.fetch_started.load(Ordering::SeqCst) == generation;

        match result {
            Ok(rules) => {
                self.apply_fetched(generation, rules, latest);
                Ok(())
            }
            Err(e) => {
                if latest {
                    self.feed.send_modify(|feed| feed.loading = false);
                }
                Err(e)
            }
        }
    }

    async fn load_rules(&self) -> StoreResult<Vec<Rule>> {
        let rows = self
            .gateway
            .query(Resource::Rules, Filter::new(), Some(Order::desc("upvotes")))
            .await?;
        let mut rules: Vec<Rule> = from_records(Resource::Rules, rows)?;

        let voted: HashSet<RuleId> = match &self.identity {
            Some(user) => {
                let rows = self
                    .gateway
                    .query(Resource::Votes, Filter::new().eq("voter", user.as_str()), None)
                    .await?;
                from_records::<Vote>(Resource::Votes, rows)?
                    .into_iter()
                    .map(|v| v.rule_id)
                    .collect()
            }
            None => HashSet::new(),
        };

        for rule in &mut rules {
            rule.has_voted = voted.contains(&rule.id);
        }
        // Stable, so ties keep backend order
        rules.sort_by(|a, b| b.upvotes.cmp(&a.upvotes));

        debug!("Fetched {} rules ({} voted)", rules.len(), voted.len());
        Ok(rules)
    }

    /// Install a fetch result unless a newer one is already shown.
    fn apply_fetched(&self, generation: u64, rules: Vec<Rule>, latest: bool) -> bool {
        let mut applied = false;
        self.feed.send_if_modified(|feed| {
            if generation > self.fetch_applied.load(Ordering::SeqCst) {
                self.fetch_applied.store(generation, Ordering::SeqCst);
                feed.rules = rules;
                feed.revision += 1;
                applied = true;
            } else {
                debug!("Discarding stale fetch #{}", generation);
            }
            if latest {
                feed.loading = false;
            }
            applied || latest
        });
        applied
    }

    fn apply_optimistic_vote(&self, rule_id: &str, user: &UserId) -> Option<PendingVote> {
        let mut pending = None;
        self.feed.send_if_modified(|feed| {
            let Some(rule) = feed.rules.iter_mut().find(|r| r.id == rule_id) else {
                debug!("toggle_vote ignored: {} not in feed", rule_id);
                return false;
            };
            if rule.is_authored_by(user.as_str()) {
                debug!("toggle_vote ignored: own rule {}", rule_id);
                return false;
            }
            if !self.begin_write(rule_id) {
                debug!("toggle_vote ignored: write in flight for {}", rule_id);
                return false;
            }

            let previous_upvotes = rule.upvotes;
            let previous_voted = rule.has_voted;
            rule.apply_vote(!rule.has_voted);

            pending = Some(PendingVote {
                previous_upvotes,
                previous_voted,
                change: VoteChange {
                    rule_id: rule.id.clone(),
                    has_voted: rule.has_voted,
                    upvotes: rule.upvotes,
                },
            });
            feed.revision += 1;
            true
        });
        pending
    }

    fn begin_write(&self, rule_id: &str) -> bool {
        self.writing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rule_id.to_string())
    }

    fn finish_write(&self, rule_id: &str) {
        self.writing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(rule_id);
        self.reconciler.reschedule(self.options.reconcile_delay);
    }

    /// Record or remove the vote, then store the new upvote count.
    ///
    /// If the count update fails, the vote write is undone.
    async fn write_vote(
        &self,
        user: &UserId,
        rule_id: &str,
        voted: bool,
        upvotes: u32,
    ) -> StoreResult<()> {
        if voted {
            let vote = NewVote {
                rule_id: rule_id.to_string(),
                voter: user.to_string(),
            };
            self.gateway
                .insert(Resource::Votes, to_record(Resource::Votes, &vote)?)
                .await?;
        } else {
            self.gateway
                .delete(Resource::Votes, vote_filter(user, rule_id))
                .await?;
        }

        let patch = to_record(Resource::Rules, &UpvotePatch { upvotes })?;
        if let Err(e) = self.gateway.update(Resource::Rules, rule_id, patch).await {
            self.undo_vote_write(user, rule_id, voted).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn undo_vote_write(&self, user: &UserId, rule_id: &str, voted: bool) {
        let result = if voted {
            self.gateway
                .delete(Resource::Votes, vote_filter(user, rule_id))
                .await
                .map(|_| ())
        } else {
            let vote = NewVote {
                rule_id: rule_id.to_string(),
                voter: user.to_string(),
            };
            match serde_json::to_value(&vote) {
                Ok(record) => self
                    .gateway
                    .insert(Resource::Votes, record)
                    .await
                    .map(|_| ()),
                Err(e) => {
                    warn!("Failed to encode compensating vote: {}", e);
                    Ok(())
                }
            }
        };

        if let Err(e) = result {
            warn!("Failed to undo vote write on {}: {}", rule_id, e);
        }
    }

    /// Put a rule back as it was before an optimistic vote, unless a fetch
    /// has replaced it since.
    fn rollback_vote(&self, pending: &PendingVote) {
        let change = &pending.change;
        self.feed.send_if_modified(|feed| {
            let Some(rule) = feed.rules.iter_mut().find(|r| r.id == change.rule_id) else {
                return false;
            };
            if rule.has_voted != change.has_voted || rule.upvotes != change.upvotes {
                return false;
            }
            rule.has_voted = pending.previous_voted;
            rule.upvotes = pending.previous_upvotes;
            feed.revision += 1;
            true
        });
    }

    /// Re-mark rules whose optimistic clear was not written
    fn restore_votes(&self, cleared: &[(RuleId, u32)]) {
        self.feed.send_if_modified(|feed| {
            let mut changed = false;
            for (rule_id, upvotes) in cleared {
                if let Some(rule) = feed
                    .rules
                    .iter_mut()
                    .find(|r| &r.id == rule_id && !r.has_voted && r.upvotes == *upvotes)
                {
                    rule.apply_vote(true);
                    changed = true;
                }
            }
            if changed {
                feed.revision += 1;
            }
            changed
        });
    }
}

#[async_trait]
impl Reconcile for Inner {
    async fn reconcile(&self) {
        match self.fetch_rules().await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!("Reconciliation fetch failed, retrying: {}", e);
                self.reconciler.nudge(self.options.reconcile_delay);
            }
            Err(e) => warn!("Reconciliation fetch failed: {}", e),
        }
    }
}

fn vote_filter(user: &UserId, rule_id: &str) -> Filter {
    Filter::new()
        .eq("rule_id", rule_id)
        .eq("voter", user.as_str())
}

fn to_record<T: serde::Serialize>(resource: Resource, value: &T) -> StoreResult<Record> {
    serde_json::to_value(value).map_err(StoreError::decode(resource))
}

fn from_records<T: DeserializeOwned>(resource: Resource, rows: Vec<Record>) -> StoreResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::decode(resource)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{DisabledGateway, GatewayError, MemoryGateway, Operation};

    const ALICE: &str = "alice";

    fn store_for(gateway: &Arc<MemoryGateway>, user: Option<&str>) -> SyncStore {
        SyncStore::new(
            gateway.clone(),
            user.and_then(UserId::parse),
            StoreOptions::default(),
        )
    }

    fn ids(store: &SyncStore) -> Vec<String> {
        store.rules().into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_fetch_sorts_and_marks_votes() {
        let gateway = Arc::new(MemoryGateway::new());
        let low = gateway.seed_rule("Drink water", "bob", 1);
        let high = gateway.seed_rule("Be kind", "bob", 9);
        let mid = gateway.seed_rule("Call home", "carol", 4);
        gateway.seed_vote(&mid, ALICE);
        gateway.seed_vote(&low, "dave");

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        assert_eq!(ids(&store), vec![high.clone(), mid.clone(), low.clone()]);
        for rule in store.rules() {
            assert_eq!(rule.has_voted, rule.id == mid, "rule {}", rule.text);
        }
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_fetch_ties_keep_backend_order() {
        let gateway = Arc::new(MemoryGateway::new());
        let first = gateway.seed_rule("a", "bob", 2);
        let second = gateway.seed_rule("b", "bob", 2);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        assert_eq!(ids(&store), vec![first, second]);
    }

    #[tokio::test]
    async fn test_fetch_without_identity_skips_votes() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_rule("a", "bob", 2);

        let store = store_for(&gateway, None);
        store.fetch_rules().await.unwrap();

        assert_eq!(store.rules().len(), 1);
        assert_eq!(gateway.count_calls(Operation::Query, Resource::Votes), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_is_optimistic_and_resorts_after_delay() {
        let gateway = Arc::new(MemoryGateway::new());
        let carol_rule = gateway.seed_rule("Read more", "carol", 3);
        let bob_rule = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        assert_eq!(ids(&store), vec![carol_rule.clone(), bob_rule.clone()]);

        let change = store.toggle_vote(&bob_rule).await.unwrap().unwrap();
        assert!(change.has_voted);
        assert_eq!(change.upvotes, 4);

        // Applied locally, position unchanged
        let rule = store.rule(&bob_rule).unwrap();
        assert_eq!(rule.upvotes, 4);
        assert!(rule.has_voted);
        assert_eq!(ids(&store), vec![carol_rule.clone(), bob_rule.clone()]);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(ids(&store), vec![carol_rule.clone(), bob_rule.clone()]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ids(&store), vec![bob_rule.clone(), carol_rule]);
        assert!(store.rule(&bob_rule).unwrap().has_voted);
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_state() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        store.toggle_vote(&id).await.unwrap().unwrap();
        let change = store.toggle_vote(&id).await.unwrap().unwrap();
        assert!(!change.has_voted);

        let rule = store.rule(&id).unwrap();
        assert_eq!(rule.upvotes, 3);
        assert!(!rule.has_voted);

        // Backend agrees
        assert!(gateway.rows(Resource::Votes).is_empty());
        assert_eq!(gateway.rows(Resource::Rules)[0]["upvotes"], 3);
    }

    #[tokio::test]
    async fn test_toggle_writes_vote_and_count() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        store.toggle_vote(&id).await.unwrap();

        let votes = gateway.rows(Resource::Votes);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0]["rule_id"], id.as_str());
        assert_eq!(votes[0]["voter"], ALICE);
        assert_eq!(gateway.rows(Resource::Rules)[0]["upvotes"], 4);
    }

    #[tokio::test]
    async fn test_self_vote_is_ignored() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("My rule", ALICE, 0);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        gateway.clear_journal();

        assert_eq!(store.toggle_vote(&id).await.unwrap(), None);
        assert_eq!(store.rule(&id).unwrap().upvotes, 0);
        assert!(gateway.journal().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_unknown_rule_is_ignored() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, Some(ALICE));

        assert_eq!(store.toggle_vote("missing").await.unwrap(), None);
        assert!(gateway.journal().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_during_write_is_ignored() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        gateway.set_latency(Some(Duration::from_millis(50)));

        let (first, second) = tokio::join!(store.toggle_vote(&id), store.toggle_vote(&id));
        assert!(first.unwrap().is_some());
        assert_eq!(second.unwrap(), None);
        assert_eq!(store.rule(&id).unwrap().upvotes, 4);
        assert_eq!(gateway.rows(Resource::Votes).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_vote_rolls_back() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        gateway.fail_next(
            Operation::Insert,
            Resource::Votes,
            GatewayError::Unavailable("timeout".to_string()),
        );

        let err = store.toggle_vote(&id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Gateway(GatewayError::Unavailable(_))
        ));

        let rule = store.rule(&id).unwrap();
        assert_eq!(rule.upvotes, 3);
        assert!(!rule.has_voted);

        // Nothing is stuck: the next toggle goes through
        assert!(store.toggle_vote(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_count_update_undoes_vote() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        gateway.fail_next(
            Operation::Update,
            Resource::Rules,
            GatewayError::NotFound {
                resource: Resource::Rules,
                id: id.clone(),
            },
        );

        assert!(store.toggle_vote(&id).await.is_err());
        assert!(gateway.rows(Resource::Votes).is_empty());
        assert!(!store.rule(&id).unwrap().has_voted);
    }

    #[tokio::test]
    async fn test_duplicate_vote_conflict_rolls_back() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        // Vote lands from another tab after our fetch
        gateway.seed_vote(&id, ALICE);

        let err = store.toggle_vote(&id).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.rule(&id).unwrap().upvotes, 3);
        assert_eq!(gateway.rows(Resource::Votes).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_toggles_reconcile_once() {
        let gateway = Arc::new(MemoryGateway::new());
        let a = gateway.seed_rule("a", "bob", 1);
        let b = gateway.seed_rule("b", "bob", 1);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        gateway.clear_journal();

        store.toggle_vote(&a).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.toggle_vote(&b).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(gateway.count_calls(Operation::Query, Resource::Rules), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_toggle_is_released_and_reconciled() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.seed_rule("Be kind", "bob", 3);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        gateway.set_latency(Some(Duration::from_millis(200)));
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), store.toggle_vote(&id)).await;
        assert!(cancelled.is_err());
        gateway.set_latency(None);

        // Optimistic change stays until the feed reconciles
        assert_eq!(store.rule(&id).unwrap().upvotes, 4);
        assert!(gateway.rows(Resource::Votes).is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let rule = store.rule(&id).unwrap();
        assert_eq!(rule.upvotes, 3);
        assert!(!rule.has_voted);

        // The rule is not left locked
        let change = store.toggle_vote(&id).await.unwrap().unwrap();
        assert!(change.has_voted);
        assert_eq!(change.upvotes, 4);
        assert_eq!(gateway.rows(Resource::Votes).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_reconcile_failure_is_retried() {
        let gateway = Arc::new(MemoryGateway::new());
        let a = gateway.seed_rule("a", "bob", 1);
        let b = gateway.seed_rule("b", "bob", 1);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        store.toggle_vote(&b).await.unwrap();

        gateway.fail_next(
            Operation::Query,
            Resource::Rules,
            GatewayError::Unavailable("timeout".to_string()),
        );
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ids(&store), vec![a.clone(), b.clone()]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ids(&store), vec![b, a]);
    }

    #[tokio::test]
    async fn test_watch_stops_when_store_is_dropped() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, Some(ALICE));
        let watch = store.watch_changes().await.unwrap();
        drop(store);

        gateway
            .insert(
                Resource::Rules,
                serde_json::json!({"text": "a", "author": "bob", "upvotes": 0}),
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !watch.task.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_add_rule_inserts_and_refetches() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, Some(ALICE));

        assert!(store.add_rule("  Be kind  ").await.unwrap());

        let rules = store.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].text, "Be kind");
        assert_eq!(rules[0].author, ALICE);
        assert_eq!(rules[0].upvotes, 0);
        assert!(!rules[0].id.is_empty());
    }

    #[tokio::test]
    async fn test_add_blank_rule_is_ignored() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, Some(ALICE));

        assert!(!store.add_rule("  ").await.unwrap());
        assert!(gateway.journal().is_empty());
        assert!(store.rules().is_empty());
    }

    #[tokio::test]
    async fn test_add_rule_without_identity_is_ignored() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, None);

        assert!(!store.add_rule("Be kind").await.unwrap());
        assert!(gateway.journal().is_empty());
    }

    #[tokio::test]
    async fn test_clear_votes_without_votes_makes_no_calls() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_rule("a", "bob", 1);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();
        gateway.clear_journal();

        assert_eq!(store.clear_votes().await.unwrap(), 0);
        assert!(gateway.journal().is_empty());
    }

    #[tokio::test]
    async fn test_clear_votes() {
        let gateway = Arc::new(MemoryGateway::new());
        let a = gateway.seed_rule("a", "bob", 5);
        let b = gateway.seed_rule("b", "carol", 2);
        let c = gateway.seed_rule("c", "bob", 1);
        gateway.seed_vote(&a, ALICE);
        gateway.seed_vote(&b, ALICE);
        gateway.seed_vote(&b, "dave");

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        assert_eq!(store.clear_votes().await.unwrap(), 2);
        assert!(store.favorites().is_empty());
        assert_eq!(store.rule(&a).unwrap().upvotes, 4);
        assert_eq!(store.rule(&b).unwrap().upvotes, 1);
        assert_eq!(store.rule(&c).unwrap().upvotes, 1);

        let votes = gateway.rows(Resource::Votes);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0]["voter"], "dave");
    }

    #[tokio::test]
    async fn test_failed_clear_restores_remaining() {
        let gateway = Arc::new(MemoryGateway::new());
        let a = gateway.seed_rule("a", "bob", 5);
        let b = gateway.seed_rule("b", "carol", 2);
        gateway.seed_vote(&a, ALICE);
        gateway.seed_vote(&b, ALICE);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        // The count update on the first rule, `a`, fails
        gateway.fail_next(
            Operation::Update,
            Resource::Rules,
            GatewayError::Unavailable("down".to_string()),
        );
        assert!(store.clear_votes().await.is_err());

        // The count update on `a` failed, so its vote was put back and
        // `b` was never touched
        assert!(store.rule(&a).unwrap().has_voted);
        assert!(store.rule(&b).unwrap().has_voted);
        assert_eq!(gateway.rows(Resource::Votes).len(), 2);
    }

    #[tokio::test]
    async fn test_favorites_follow_feed_order() {
        let gateway = Arc::new(MemoryGateway::new());
        let low = gateway.seed_rule("low", "bob", 1);
        let high = gateway.seed_rule("high", "bob", 8);
        gateway.seed_rule("other", "bob", 4);
        gateway.seed_vote(&low, ALICE);
        gateway.seed_vote(&high, ALICE);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        let texts: Vec<String> = store.favorites().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_disabled_backend_is_reported() {
        let store = SyncStore::new(
            Arc::new(DisabledGateway),
            UserId::parse(ALICE),
            StoreOptions::default(),
        );

        assert!(!store.is_enabled());
        assert!(matches!(store.fetch_rules().await, Err(StoreError::Disabled)));
        assert!(matches!(store.add_rule("x").await, Err(StoreError::Disabled)));
        assert!(matches!(store.toggle_vote("x").await, Err(StoreError::Disabled)));
        assert!(matches!(store.clear_votes().await, Err(StoreError::Disabled)));
        assert!(store.rules().is_empty());
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, Some(ALICE));
        let inner = &store.inner;

        let rule = |id: &str| Rule {
            id: id.to_string(),
            text: id.to_string(),
            author: "bob".to_string(),
            upvotes: 0,
            created_at: chrono::Utc::now(),
            has_voted: false,
        };

        assert!(inner.apply_fetched(2, vec![rule("new")], true));
        assert!(!inner.apply_fetched(1, vec![rule("old")], false));
        assert_eq!(ids(&store), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_feed() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_rule("a", "bob", 1);

        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        gateway.set_offline(true);
        assert!(store.fetch_rules().await.is_err());
        assert_eq!(store.rules().len(), 1);
        assert!(!store.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_changes_refetches() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = store_for(&gateway, Some(ALICE));
        store.fetch_rules().await.unwrap();

        let _watch = store.watch_changes().await.unwrap();

        // Another client adds a rule
        gateway
            .insert(
                Resource::Rules,
                serde_json::json!({"text": "Sleep early", "author": "bob", "upvotes": 0}),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.rules().len(), 1);
        assert_eq!(store.rules()[0].text, "Sleep early");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_rule("a", "bob", 1);

        let store = store_for(&gateway, Some(ALICE));
        let mut rx = store.subscribe();
        store.fetch_rules().await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().rules.len(), 1);
    }
}
