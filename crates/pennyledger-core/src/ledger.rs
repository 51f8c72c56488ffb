//! Ledger controller
//!
//! Single owner of the transaction collection, the category set and the
//! paging state. Local state is mutated synchronously and is the
//! authoritative view between commits; remote calls only confirm. Mutations
//! return a [`PendingMutation`] future that performs the remote half.

use futures::future::{self, BoxFuture, FutureExt};
use pennyledger_config::Config;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::error::{
    CoreError, CoreResult, DefaultErrorLogger, ErrorContext, ErrorLogger, Notification,
};
use crate::lane::WriteLanes;
use crate::models::{Category, Field, FieldPatch, LedgerSummary, RowKey, Transaction, UserScope};
use crate::row::RowIntent;
use crate::store::StoreRef;

/// Remote half of a mutation.
///
/// The local effect has already been applied when this is handed out. Drive
/// it to completion; dropping it leaves the local change unconfirmed.
pub type PendingMutation<'a> = BoxFuture<'a, CoreResult<()>>;

#[derive(Debug, Clone)]
struct Entry {
    /// Insertion order, used to break sort ties
    seq: u64,
    transaction: Transaction,
}

/// Bookkeeping for a field with local edits not yet settled
#[derive(Debug)]
struct FieldEdit {
    generation: u64,
    in_flight: usize,
    /// Last value the store is known to hold
    confirmed: String,
}

/// Outcome of an in-flight category add, `None` until it settles
type CategoryOutcome = watch::Receiver<Option<CoreResult<()>>>;

/// Writes that settled while a load may have been in flight.
///
/// Each entry holds the load generation current when the write settled. A
/// load of that generation or older may have read the store before the
/// write landed, so its result must not override the local state.
#[derive(Debug, Default)]
struct Settled {
    deletes: HashMap<String, u64>,
    fields: HashMap<(String, Field), u64>,
    creates: HashMap<String, u64>,
    categories: HashMap<String, u64>,
}

fn settled_since<K>(stamps: &HashMap<K, u64>, key: &K, generation: u64) -> bool
where
    K: std::hash::Hash + Eq,
{
    stamps.get(key).is_some_and(|stamp| *stamp >= generation)
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Always ordered by `seq`
    entries: Vec<Entry>,
    next_seq: u64,
    categories: BTreeMap<String, Category>,
    pending_categories: HashMap<String, CategoryOutcome>,
    field_edits: HashMap<(String, Field), FieldEdit>,
    pending_deletes: HashSet<String>,
    settled: Settled,
    current_page: usize,
    notifications: Vec<Notification>,
    load_generation: u64,
    category_generation: u64,
}

impl LedgerState {
    fn push(&mut self, transaction: Transaction) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { seq, transaction });
        seq
    }

    fn position(&self, key: &RowKey) -> Option<usize> {
        self.entries.iter().position(|e| key.matches(&e.transaction))
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.transaction.id.as_deref() == Some(id))
    }

    fn sorted(&self) -> Vec<&Transaction> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.transaction.timestamp(), &e.transaction))
            .collect();
        // Stable: equal timestamps keep insertion order
        rows.sort_by(|a, b| match (&a.0, &b.0) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        rows.into_iter().map(|(_, t)| t).collect()
    }

    /// Replace persisted rows with the store's view, keeping local work.
    ///
    /// `generation` is the load the rows came from; writes that settled
    /// during it win over what it read.
    fn merge_remote(&mut self, remote: Vec<Transaction>, generation: u64) {
        let mut known: HashMap<String, Entry> = HashMap::new();
        let mut merged: Vec<Entry> = Vec::with_capacity(remote.len());
        for entry in self.entries.drain(..) {
            match entry.transaction.id.clone() {
                Some(id) => {
                    known.insert(id, entry);
                }
                None => merged.push(entry),
            }
        }

        let mut seen = HashSet::new();
        for mut transaction in remote {
            let Some(id) = transaction.id.clone() else {
                log::warn!("ignoring store record without id: {}", transaction.description);
                continue;
            };
            if self.pending_deletes.contains(&id)
                || settled_since(&self.settled.deletes, &id, generation)
                || !seen.insert(id.clone())
            {
                continue;
            }

            let previous = known.remove(&id);
            for field in [Field::Description, Field::Category] {
                let slot = (id.clone(), field);
                let stale = settled_since(&self.settled.fields, &slot, generation);
                let in_flight = match self.field_edits.get_mut(&slot) {
                    Some(edit) => {
                        if !stale {
                            edit.confirmed = transaction.field(field).to_string();
                        }
                        true
                    }
                    None => false,
                };
                if in_flight || stale {
                    if let Some(ref local) = previous {
                        transaction.set_field(field, local.transaction.field(field).to_string());
                    }
                }
            }

            let seq = match previous {
                Some(entry) => entry.seq,
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    seq
                }
            };
            merged.push(Entry { seq, transaction });
        }

        // Created after the store was read
        for (id, entry) in known {
            if settled_since(&self.settled.creates, &id, generation) {
                merged.push(entry);
            }
        }

        merged.sort_by_key(|e| e.seq);
        self.entries = merged;

        let settled = &mut self.settled;
        settled.deletes.retain(|_, stamp| *stamp > generation);
        settled.fields.retain(|_, stamp| *stamp > generation);
        settled.creates.retain(|_, stamp| *stamp > generation);
    }
}

/// Owner of the ledger's transactions, categories and paging
pub struct LedgerController {
    store: StoreRef,
    scope: UserScope,
    page_size: usize,
    state: RwLock<LedgerState>,
    lanes: WriteLanes,
    alive: AtomicBool,
    logger: Box<dyn ErrorLogger>,
}

impl LedgerController {
    /// Create an empty ledger for `scope`; a zero page size is treated as one
    pub fn new(store: StoreRef, scope: UserScope, page_size: usize) -> Self {
        Self {
            store,
            scope,
            page_size: page_size.max(1),
            state: RwLock::new(LedgerState {
                current_page: 1,
                ..LedgerState::default()
            }),
            lanes: WriteLanes::default(),
            alive: AtomicBool::new(true),
            logger: Box::new(DefaultErrorLogger),
        }
    }

    pub fn from_config(store: StoreRef, config: &Config) -> Self {
        Self::new(
            store,
            UserScope::new(&config.session.user_id),
            config.pagination.records_per_page,
        )
    }

    /// Replace the error logger
    pub fn with_logger(mut self, logger: Box<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn scope(&self) -> &UserScope {
        &self.scope
    }

    pub(crate) fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(AtomicOrdering::SeqCst)
    }

    /// Mark the ledger discarded; results of outstanding loads are dropped
    pub fn teardown(&self) {
        self.alive.store(false, AtomicOrdering::SeqCst);
        log::debug!("ledger for {} torn down", self.scope.user_id);
    }

    fn context(&self, operation: &str) -> ErrorContext {
        ErrorContext::new(operation).with_user_id(&self.scope.user_id)
    }

    /// Log a remote failure and record it for the user, exactly once
    fn report(&self, state: &mut LedgerState, error: &CoreError, context: ErrorContext) {
        self.logger.log_error(error, &context);
        state.notifications.push(Notification::from(error));
    }

    pub(crate) fn record_failure(&self, error: &CoreError, context: ErrorContext) {
        let mut state = self.write();
        self.report(&mut state, error, context);
    }

    // ==================== Loading ====================

    /// Fetch the collection from the store.
    ///
    /// On failure the previous collection is kept, a `LoadFailed`
    /// notification is recorded and the error returned.
    pub async fn load(&self) -> CoreResult<Vec<Transaction>> {
        let generation = {
            let mut state = self.write();
            state.load_generation += 1;
            state.load_generation
        };

        let result = self.store.list_transactions(&self.scope).await;

        if !self.is_alive() {
            return Err(CoreError::Discarded {
                reason: "ledger was torn down".to_string(),
            });
        }

        let mut state = self.write();
        if state.load_generation != generation {
            return Err(CoreError::Discarded {
                reason: "superseded by a newer load".to_string(),
            });
        }

        match result {
            Ok(remote) => {
                log::debug!("loaded {} transactions for {}", remote.len(), self.scope.user_id);
                state.merge_remote(remote, generation);
                Ok(state.sorted().into_iter().cloned().collect())
            }
            Err(e) => {
                let error = CoreError::LoadFailed {
                    resource: "transactions".to_string(),
                    message: e.to_string(),
                };
                self.report(&mut state, &error, self.context("load_transactions"));
                Err(error)
            }
        }
    }

    /// Fetch the category set, keeping categories whose creation is in flight
    pub async fn load_categories(&self) -> CoreResult<Vec<Category>> {
        let generation = {
            let mut state = self.write();
            state.category_generation += 1;
            state.category_generation
        };

        let result = self.store.list_categories(&self.scope).await;

        if !self.is_alive() {
            return Err(CoreError::Discarded {
                reason: "ledger was torn down".to_string(),
            });
        }

        let mut state = self.write();
        if state.category_generation != generation {
            return Err(CoreError::Discarded {
                reason: "superseded by a newer load".to_string(),
            });
        }

        match result {
            Ok(remote) => {
                let mut categories: BTreeMap<String, Category> = remote
                    .into_iter()
                    .map(|c| (c.name.clone(), c))
                    .collect();
                for (name, local) in &state.categories {
                    if state.pending_categories.contains_key(name)
                        || settled_since(&state.settled.categories, name, generation)
                    {
                        categories.entry(name.clone()).or_insert_with(|| local.clone());
                    }
                }
                state.categories = categories;
                state
                    .settled
                    .categories
                    .retain(|_, stamp| *stamp > generation);
                Ok(state.categories.values().cloned().collect())
            }
            Err(e) => {
                let error = CoreError::LoadFailed {
                    resource: "categories".to_string(),
                    message: e.to_string(),
                };
                self.report(&mut state, &error, self.context("load_categories"));
                Err(error)
            }
        }
    }

    /// Load transactions and categories
    pub async fn refresh(&self) -> CoreResult<()> {
        let (transactions, categories) = futures::join!(self.load(), self.load_categories());
        transactions?;
        categories?;
        Ok(())
    }

    // ==================== Reading ====================

    /// All transactions, most recent first
    pub fn transactions(&self) -> Vec<Transaction> {
        self.read().sorted().into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transaction(&self, key: &RowKey) -> Option<Transaction> {
        let state = self.read();
        state.position(key).map(|i| state.entries[i].transaction.clone())
    }

    pub fn find_by_id(&self, id: &str) -> Option<Transaction> {
        self.transaction(&RowKey::Persisted(id.to_string()))
    }

    /// Categories ordered by name
    pub fn categories(&self) -> Vec<Category> {
        self.read().categories.values().cloned().collect()
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.read().categories.contains_key(name)
    }

    pub fn summary(&self) -> LedgerSummary {
        let state = self.read();
        let mut summary = LedgerSummary {
            total_transactions: state.entries.len(),
            ..LedgerSummary::default()
        };
        for entry in &state.entries {
            let transaction = &entry.transaction;
            if !transaction.is_persisted() {
                summary.pending_transactions += 1;
            }
            if transaction.is_uncategorised() {
                summary.uncategorised += 1;
            }
            if transaction.amount > 0 {
                summary.total_credit = summary.total_credit.saturating_add(transaction.amount);
            } else {
                summary.total_debit = summary.total_debit.saturating_add(transaction.amount);
            }
        }
        summary.net = summary.total_credit.saturating_add(summary.total_debit);
        summary
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.read().notifications.clone()
    }

    /// Take and clear the recorded notifications
    pub fn drain_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.write().notifications)
    }

    // ==================== Paging ====================

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages, at least one even when empty
    pub fn total_pages(&self) -> usize {
        self.pages_for(self.len())
    }

    fn pages_for(&self, count: usize) -> usize {
        count.div_ceil(self.page_size).max(1)
    }

    fn clamp_page(&self, page: usize, count: usize) -> usize {
        page.clamp(1, self.pages_for(count))
    }

    /// Rows on 1-based page `page`, clamped to the valid range
    pub fn page(&self, page: usize) -> Vec<Transaction> {
        let state = self.read();
        let page = self.clamp_page(page, state.entries.len());
        state
            .sorted()
            .into_iter()
            .skip((page - 1) * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect()
    }

    /// Current page, re-clamped against the collection as it is now
    pub fn current_page(&self) -> usize {
        let state = self.read();
        self.clamp_page(state.current_page, state.entries.len())
    }

    /// Move to `page` (clamped) and return the page actually selected
    pub fn set_page(&self, page: usize) -> usize {
        let mut state = self.write();
        let page = self.clamp_page(page, state.entries.len());
        state.current_page = page;
        page
    }

    pub fn next_page(&self) -> usize {
        self.set_page(self.current_page() + 1)
    }

    pub fn previous_page(&self) -> usize {
        self.set_page(self.current_page().saturating_sub(1))
    }

    pub fn current_page_rows(&self) -> Vec<Transaction> {
        self.page(self.current_page())
    }

    // ==================== Mutations ====================

    /// Route an intent produced by the view
    pub fn dispatch(&self, intent: RowIntent) -> CoreResult<PendingMutation<'_>> {
        match intent {
            RowIntent::Update { key, patch } => self.update_field(&key, patch),
            RowIntent::Delete { key } => self.delete_transaction(&key),
            RowIntent::AddCategory { name } => self.add_category(&name),
        }
    }

    /// Apply `patch` locally now and send it to the store.
    ///
    /// If the store rejects it, each field is reverted to the last confirmed
    /// value unless a newer local edit of that field has been issued since.
    pub fn update_field(&self, key: &RowKey, patch: FieldPatch) -> CoreResult<PendingMutation<'_>> {
        if patch.is_empty() {
            return Err(CoreError::invalid_input("patch does not change any field"));
        }

        let (id, issued) = {
            let mut state = self.write();
            let index = state.position(key).ok_or_else(|| CoreError::TransactionNotFound {
                key: key.to_string(),
            })?;
            let id = state.entries[index]
                .transaction
                .id
                .clone()
                .ok_or_else(|| CoreError::invalid_input("transaction is not yet persisted"))?;

            let mut issued = Vec::new();
            for (field, value) in patch.fields() {
                let previous = state.entries[index].transaction.field(field).to_string();
                state.entries[index]
                    .transaction
                    .set_field(field, value.to_string());
                let edit = state
                    .field_edits
                    .entry((id.clone(), field))
                    .or_insert_with(|| FieldEdit {
                        generation: 0,
                        in_flight: 0,
                        confirmed: previous,
                    });
                edit.generation += 1;
                edit.in_flight += 1;
                issued.push((field, edit.generation, value.to_string()));
            }
            (id, issued)
        };

        log::debug!("updating {} locally: {:?}", id, patch);
        let ticket = self.lanes.issue(&id);

        Ok(async move {
            ticket.wait_turn().await;
            let result = self.store.update_transaction(&self.scope, &id, &patch).await;
            drop(ticket);

            let mut state = self.write();
            let failed = result.is_err();
            let stamp = state.load_generation;
            for (field, generation, value) in issued {
                let slot = (id.clone(), field);
                state.settled.fields.insert(slot.clone(), stamp);
                let Some(edit) = state.field_edits.get_mut(&slot) else {
                    continue;
                };
                edit.in_flight -= 1;
                let revert_to = if failed {
                    (edit.generation == generation).then(|| edit.confirmed.clone())
                } else {
                    edit.confirmed = value;
                    None
                };
                if edit.in_flight == 0 {
                    state.field_edits.remove(&slot);
                }
                if let Some(original) = revert_to {
                    if let Some(index) = state.position_by_id(&id) {
                        log::debug!("reverting {} of {} to confirmed value", field, id);
                        state.entries[index].transaction.set_field(field, original);
                    }
                }
            }

            match result {
                Ok(()) => Ok(()),
                Err(e) => {
                    let error = CoreError::MutationFailed {
                        operation: "update transaction".to_string(),
                        message: e.to_string(),
                    };
                    let context = self.context("update_transaction").with_row(&id);
                    self.report(&mut state, &error, context);
                    Err(error)
                }
            }
        }
        .boxed())
    }

    /// Remove a row now and delete it remotely.
    ///
    /// A failed remote delete does not bring the row back; it reappears only
    /// on the next successful load.
    pub fn delete_transaction(&self, key: &RowKey) -> CoreResult<PendingMutation<'_>> {
        let removed = {
            let mut state = self.write();
            let index = state.position(key).ok_or_else(|| CoreError::TransactionNotFound {
                key: key.to_string(),
            })?;
            let entry = state.entries.remove(index);
            if let Some(ref id) = entry.transaction.id {
                state.pending_deletes.insert(id.clone());
                state.field_edits.retain(|(edited, _), _| edited != id);
            }
            entry.transaction
        };

        let Some(id) = removed.id else {
            log::debug!("removed unpersisted row {}", key);
            return Ok(future::ready(Ok(())).boxed());
        };

        let ticket = self.lanes.issue(&id);
        Ok(async move {
            ticket.wait_turn().await;
            let result = self.store.delete_transaction(&self.scope, &id).await;
            drop(ticket);

            let mut state = self.write();
            state.pending_deletes.remove(&id);
            let stamp = state.load_generation;
            state.settled.deletes.insert(id.clone(), stamp);
            result.map_err(|e| {
                let error = CoreError::MutationFailed {
                    operation: "delete transaction".to_string(),
                    message: e.to_string(),
                };
                let context = self.context("delete_transaction").with_row(&id);
                self.report(&mut state, &error, context);
                error
            })
        }
        .boxed())
    }

    /// Add a category locally now and persist it; removed again on failure.
    ///
    /// Adding a name whose creation is still in flight makes no remote call
    /// and resolves with the outcome of the earlier add.
    pub fn add_category(&self, name: &str) -> CoreResult<PendingMutation<'_>> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::invalid_input("category name cannot be empty"));
        }

        let settled = {
            let mut state = self.write();
            let abandoned = match state.pending_categories.get(&name) {
                // Closed without an outcome: the earlier add was dropped unpolled
                Some(outcome) if outcome.has_changed().is_err() => true,
                Some(outcome) => return Ok(Self::follow(outcome.clone()).boxed()),
                None => false,
            };
            if abandoned {
                state.pending_categories.remove(&name);
            } else if state.categories.contains_key(&name) {
                return Ok(future::ready(Ok(())).boxed());
            }
            let (settled, outcome) = watch::channel(None);
            state.categories.insert(name.clone(), Category::new(&name));
            state.pending_categories.insert(name.clone(), outcome);
            settled
        };

        Ok(async move {
            let result = self.store.create_category(&self.scope, &name).await;

            let outcome = {
                let mut state = self.write();
                state.pending_categories.remove(&name);
                let stamp = state.category_generation;
                state.settled.categories.insert(name.clone(), stamp);
                result.map_err(|e| {
                    state.categories.remove(&name);
                    let error = CoreError::MutationFailed {
                        operation: format!("add category '{}'", name),
                        message: e.to_string(),
                    };
                    self.report(&mut state, &error, self.context("add_category"));
                    error
                })
            };
            settled.send_replace(Some(outcome.clone()));
            outcome
        }
        .boxed())
    }

    /// Wait for an in-flight add of the same category
    async fn follow(mut outcome: CategoryOutcome) -> CoreResult<()> {
        match outcome.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone().unwrap_or(Ok(())),
            Err(_) => Err(CoreError::Discarded {
                reason: "earlier add of this category was abandoned".to_string(),
            }),
        }
    }

    /// Insert an unpersisted transaction now and create it remotely.
    ///
    /// On success the row takes the store's id and keeps its local fields.
    /// On failure it stays in the ledger unconfirmed.
    pub fn add_transaction(&self, transaction: Transaction) -> CoreResult<PendingMutation<'_>> {
        if transaction.id.is_some() {
            return Err(CoreError::invalid_input("new transactions must not carry an id"));
        }
        if transaction.timestamp().is_none() {
            return Err(CoreError::InvalidDate {
                input: transaction.transaction_date_time.clone(),
            });
        }

        let seq = self.write().push(transaction.clone());

        Ok(async move {
            let created = match self.store.create_transaction(&self.scope, transaction).await {
                Ok(created) => created,
                Err(e) => {
                    let error = CoreError::MutationFailed {
                        operation: "create transaction".to_string(),
                        message: e.to_string(),
                    };
                    self.record_failure(&error, self.context("create_transaction"));
                    return Err(error);
                }
            };

            let Some(id) = created.id else {
                let error = CoreError::MutationFailed {
                    operation: "create transaction".to_string(),
                    message: "store returned a record without an id".to_string(),
                };
                self.record_failure(&error, self.context("create_transaction"));
                return Err(error);
            };

            let orphaned = {
                let mut state = self.write();
                // A load may already have brought the created record in
                state
                    .entries
                    .retain(|e| e.seq == seq || e.transaction.id.as_deref() != Some(id.as_str()));
                let kept = match state.entries.iter_mut().find(|e| e.seq == seq) {
                    Some(entry) => {
                        entry.transaction.id = Some(id.clone());
                        true
                    }
                    None => false,
                };
                if kept {
                    let stamp = state.load_generation;
                    state.settled.creates.insert(id.clone(), stamp);
                }
                !kept
            };

            if orphaned {
                log::debug!("row deleted while {} was being created; deleting remotely", id);
                let ticket = self.lanes.issue(&id);
                ticket.wait_turn().await;
                if let Err(e) = self.store.delete_transaction(&self.scope, &id).await {
                    let error = CoreError::MutationFailed {
                        operation: "delete transaction".to_string(),
                        message: e.to_string(),
                    };
                    let context = self.context("delete_transaction").with_row(&id);
                    self.record_failure(&error, context);
                    return Err(error);
                }
            }
            Ok(())
        }
        .boxed())
    }

    /// Swap an imported batch's unpersisted rows for the persisted records.
    ///
    /// Records whose id is already present replace that row, so applying
    /// the same result twice adds nothing. Returns the number of new rows.
    pub(crate) fn apply_import(&self, batch: &[RowKey], persisted: Vec<Transaction>) -> usize {
        let mut state = self.write();
        for key in batch.iter().filter(|k| k.id().is_none()) {
            if let Some(index) = state.position(key) {
                state.entries.remove(index);
            }
        }

        let mut added = 0;
        let stamp = state.load_generation;
        for transaction in persisted {
            let Some(id) = transaction.id.clone() else {
                log::warn!("import returned a record without id: {}", transaction.description);
                continue;
            };
            state.settled.creates.insert(id.clone(), stamp);
            match state.position_by_id(&id) {
                Some(index) => state.entries[index].transaction = transaction,
                None => {
                    state.push(transaction);
                    added += 1;
                }
            }
        }
        added
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, StoreError, StoreOperation, TransactionStore};
    use crate::ErrorCode;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    fn scope() -> UserScope {
        UserScope::new("user-1")
    }

    fn dated(day: u32, description: &str, amount: i64) -> Transaction {
        Transaction::new(description, amount, &format!("2024-05-{:02}T09:00:00Z", day))
    }

    fn seeded(count: usize) -> Arc<InMemoryStore> {
        let transactions = (0..count)
            .map(|i| dated((i % 28 + 1) as u32, &format!("Item {}", i), -(i as i64) * 100))
            .collect();
        Arc::new(InMemoryStore::new().with_transactions(&scope(), transactions))
    }

    async fn loaded(store: Arc<InMemoryStore>, page_size: usize) -> LedgerController {
        let ledger = LedgerController::new(store, scope(), page_size);
        ledger.load().await.unwrap();
        ledger
    }

    /// Store whose updates wait for a permit, recording their order
    struct GatedStore {
        inner: InMemoryStore,
        gate: Semaphore,
        updates: Mutex<Vec<FieldPatch>>,
        fail_updates: Mutex<Vec<bool>>,
    }

    impl GatedStore {
        fn new(inner: InMemoryStore) -> Self {
            Self {
                inner,
                gate: Semaphore::new(0),
                updates: Mutex::new(Vec::new()),
                fail_updates: Mutex::new(Vec::new()),
            }
        }

        fn script_update_failures(&self, outcomes: &[bool]) {
            *self.fail_updates.lock().unwrap() = outcomes.to_vec();
        }
    }

    #[async_trait]
    impl TransactionStore for GatedStore {
        async fn list_transactions(&self, scope: &UserScope) -> Result<Vec<Transaction>, StoreError> {
            self.inner.list_transactions(scope).await
        }

        async fn create_transaction(
            &self,
            scope: &UserScope,
            transaction: Transaction,
        ) -> Result<Transaction, StoreError> {
            self.gate.acquire().await.unwrap().forget();
            self.inner.create_transaction(scope, transaction).await
        }

        async fn update_transaction(
            &self,
            scope: &UserScope,
            id: &str,
            patch: &FieldPatch,
        ) -> Result<(), StoreError> {
            self.gate.acquire().await.unwrap().forget();
            self.updates.lock().unwrap().push(patch.clone());
            let fail = {
                let mut scripted = self.fail_updates.lock().unwrap();
                if scripted.is_empty() { false } else { scripted.remove(0) }
            };
            if fail {
                return Err(StoreError::Unavailable { message: "scripted".to_string() });
            }
            self.inner.update_transaction(scope, id, patch).await
        }

        async fn delete_transaction(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
            self.inner.delete_transaction(scope, id).await
        }

        async fn import_transactions(
            &self,
            scope: &UserScope,
            records: Vec<Transaction>,
        ) -> Result<Vec<Transaction>, StoreError> {
            self.inner.import_transactions(scope, records).await
        }

        async fn list_categories(&self, scope: &UserScope) -> Result<Vec<Category>, StoreError> {
            self.inner.list_categories(scope).await
        }

        async fn create_category(&self, scope: &UserScope, name: &str) -> Result<(), StoreError> {
            self.inner.create_category(scope, name).await
        }
    }

    /// Store whose list calls read their snapshot, then wait for a permit
    /// before replying
    struct HeldListStore {
        inner: InMemoryStore,
        reply: Semaphore,
    }

    impl HeldListStore {
        fn new(inner: InMemoryStore) -> Self {
            Self { inner, reply: Semaphore::new(0) }
        }
    }

    #[async_trait]
    impl TransactionStore for HeldListStore {
        async fn list_transactions(&self, scope: &UserScope) -> Result<Vec<Transaction>, StoreError> {
            let snapshot = self.inner.list_transactions(scope).await;
            self.reply.acquire().await.unwrap().forget();
            snapshot
        }

        async fn create_transaction(
            &self,
            scope: &UserScope,
            transaction: Transaction,
        ) -> Result<Transaction, StoreError> {
            self.inner.create_transaction(scope, transaction).await
        }

        async fn update_transaction(
            &self,
            scope: &UserScope,
            id: &str,
            patch: &FieldPatch,
        ) -> Result<(), StoreError> {
            self.inner.update_transaction(scope, id, patch).await
        }

        async fn delete_transaction(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
            self.inner.delete_transaction(scope, id).await
        }

        async fn import_transactions(
            &self,
            scope: &UserScope,
            records: Vec<Transaction>,
        ) -> Result<Vec<Transaction>, StoreError> {
            self.inner.import_transactions(scope, records).await
        }

        async fn list_categories(&self, scope: &UserScope) -> Result<Vec<Category>, StoreError> {
            let snapshot = self.inner.list_categories(scope).await;
            self.reply.acquire().await.unwrap().forget();
            snapshot
        }

        async fn create_category(&self, scope: &UserScope, name: &str) -> Result<(), StoreError> {
            self.inner.create_category(scope, name).await
        }
    }

    async fn held(transactions: Vec<Transaction>) -> (Arc<HeldListStore>, LedgerController) {
        let store = Arc::new(HeldListStore::new(
            InMemoryStore::new().with_transactions(&scope(), transactions),
        ));
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        store.reply.add_permits(1);
        ledger.load().await.unwrap();
        (store, ledger)
    }

    // ---------- paging and ordering ----------

    #[tokio::test]
    async fn test_scenario_a_page_count() {
        let ledger = loaded(seeded(32), 15).await;
        assert_eq!(ledger.total_pages(), 3);
        assert_eq!(ledger.page(1).len(), 15);
        assert_eq!(ledger.page(3).len(), 2);
    }

    #[tokio::test]
    async fn test_page_sizes_and_concatenation() {
        for count in [0usize, 1, 14, 15, 16, 30, 31, 47] {
            for page_size in [15usize, 17, 20] {
                let ledger = loaded(seeded(count), page_size).await;
                let total = ledger.total_pages();
                assert_eq!(total, count.div_ceil(page_size).max(1));

                let mut all = Vec::new();
                for n in 1..=total {
                    let rows = ledger.page(n);
                    let expected = page_size.min(count.saturating_sub((n - 1) * page_size));
                    assert_eq!(rows.len(), expected, "count {} size {} page {}", count, page_size, n);
                    all.extend(rows);
                }
                assert_eq!(all, ledger.transactions());
            }
        }
    }

    #[tokio::test]
    async fn test_page_is_clamped() {
        let ledger = loaded(seeded(32), 15).await;
        assert_eq!(ledger.page(0), ledger.page(1));
        assert_eq!(ledger.page(99), ledger.page(3));
        assert_eq!(ledger.set_page(99), 3);
        assert_eq!(ledger.next_page(), 3);
        assert_eq!(ledger.previous_page(), 2);
        assert_eq!(ledger.set_page(0), 1);
        assert_eq!(ledger.previous_page(), 1);

        let empty = loaded(seeded(0), 15).await;
        assert_eq!(empty.total_pages(), 1);
        assert!(empty.page(1).is_empty());
    }

    #[tokio::test]
    async fn test_current_page_follows_shrinking_ledger() {
        let ledger = loaded(seeded(16), 15).await;
        assert_eq!(ledger.set_page(2), 2);
        let last = ledger.page(2)[0].key();
        ledger.delete_transaction(&last).unwrap().await.unwrap();
        assert_eq!(ledger.current_page(), 1);
        assert_eq!(ledger.current_page_rows().len(), 15);
    }

    #[tokio::test]
    async fn test_sorted_most_recent_first_and_stable() {
        let store = Arc::new(InMemoryStore::new().with_transactions(
            &scope(),
            vec![
                dated(1, "old", -1),
                dated(3, "tie-a", -2),
                dated(2, "middle", -3),
                Transaction::new("garbled", -4, "yesterday"),
                dated(3, "tie-b", -5),
                Transaction::new("offset", -6, "2024-05-03T10:00:00+01:00"),
            ],
        ));
        let ledger = loaded(store, 15).await;
        let order: Vec<_> = ledger.transactions().into_iter().map(|t| t.description).collect();
        // 10:00+01:00 is 09:00Z, tying with the other day-3 rows
        assert_eq!(order, vec!["tie-a", "tie-b", "offset", "middle", "old", "garbled"]);
    }

    #[tokio::test]
    async fn test_reload_keeps_tie_order() {
        let store = Arc::new(InMemoryStore::new().with_transactions(
            &scope(),
            vec![dated(3, "first", -1), dated(3, "second", -2)],
        ));
        let ledger = loaded(store.clone(), 15).await;
        ledger.load().await.unwrap();
        let order: Vec<_> = ledger.transactions().into_iter().map(|t| t.description).collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    // ---------- loading ----------

    #[tokio::test]
    async fn test_load_failure_keeps_previous_collection() {
        let store = seeded(5);
        let ledger = loaded(store.clone(), 15).await;
        let before = ledger.transactions();

        store.fail_next(StoreOperation::ListTransactions, 1);
        let err = ledger.load().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LoadFailed);
        assert_eq!(ledger.transactions(), before);

        let notifications = ledger.drain_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].code, ErrorCode::LoadFailed);
        assert!(ledger.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_load_after_teardown_is_discarded() {
        let ledger = LedgerController::new(seeded(3), scope(), 15);
        ledger.teardown();
        let err = ledger.load().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Discarded);
        assert!(ledger.is_empty());
        assert!(ledger.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_category_load_failure_keeps_set() {
        let store = Arc::new(
            InMemoryStore::new().with_categories(&scope(), vec![Category::new("Food")]),
        );
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        ledger.load_categories().await.unwrap();

        store.fail_next(StoreOperation::ListCategories, 1);
        assert!(ledger.load_categories().await.is_err());
        assert!(ledger.has_category("Food"));
        assert_eq!(ledger.notifications()[0].code, ErrorCode::LoadFailed);
    }

    // ---------- updates ----------

    #[tokio::test]
    async fn test_update_is_visible_before_remote_reply() {
        let ledger = loaded(seeded(3), 15).await;
        let key = RowKey::Persisted("txn-1".to_string());

        let pending = ledger.update_field(&key, FieldPatch::description("X")).unwrap();
        assert_eq!(ledger.transaction(&key).unwrap().description, "X");

        pending.await.unwrap();
        assert_eq!(ledger.transaction(&key).unwrap().description, "X");
    }

    #[tokio::test]
    async fn test_failed_update_reverts_and_notifies() {
        let store = seeded(3);
        let ledger = loaded(store.clone(), 15).await;
        let key = RowKey::Persisted("txn-2".to_string());
        let original = ledger.transaction(&key).unwrap().description;

        store.fail_next(StoreOperation::UpdateTransaction, 1);
        let err = ledger
            .update_field(&key, FieldPatch::description("Renamed"))
            .unwrap()
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::MutationFailed);
        assert_eq!(ledger.transaction(&key).unwrap().description, original);
        assert_eq!(ledger.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_update_validation() {
        let ledger = loaded(seeded(1), 15).await;
        let key = RowKey::Persisted("txn-1".to_string());
        assert!(matches!(
            ledger.update_field(&key, FieldPatch::default()),
            Err(CoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            ledger.update_field(&RowKey::Persisted("missing".to_string()), FieldPatch::category("A")),
            Err(CoreError::TransactionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_writes_reach_store_in_issue_order() {
        let store = Arc::new(GatedStore::new(
            InMemoryStore::new().with_transactions(&scope(), vec![dated(1, "Tesco", -500)]),
        ));
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        ledger.load().await.unwrap();
        let key = RowKey::Persisted("txn-1".to_string());

        let first = ledger.update_field(&key, FieldPatch::description("A")).unwrap();
        let second = ledger.update_field(&key, FieldPatch::category("Food")).unwrap();
        let third = ledger.update_field(&key, FieldPatch::description("B")).unwrap();
        store.gate.add_permits(3);

        let (c, b, a) = tokio::join!(third, second, first);
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(
            *store.updates.lock().unwrap(),
            vec![
                FieldPatch::description("A"),
                FieldPatch::category("Food"),
                FieldPatch::description("B"),
            ]
        );
        let row = ledger.transaction(&key).unwrap();
        assert_eq!((row.description.as_str(), row.category.as_str()), ("B", "Food"));
    }

    #[tokio::test]
    async fn test_late_failure_does_not_undo_newer_edit() {
        let store = Arc::new(GatedStore::new(
            InMemoryStore::new().with_transactions(&scope(), vec![dated(1, "Tesco", -500)]),
        ));
        store.script_update_failures(&[true, false]);
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        ledger.load().await.unwrap();
        let key = RowKey::Persisted("txn-1".to_string());

        let older = ledger.update_field(&key, FieldPatch::description("A")).unwrap();
        let newer = ledger.update_field(&key, FieldPatch::description("B")).unwrap();
        store.gate.add_permits(2);
        let (older, newer) = tokio::join!(older, newer);

        assert!(older.is_err());
        assert!(newer.is_ok());
        assert_eq!(ledger.transaction(&key).unwrap().description, "B");
        assert_eq!(ledger.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_latest_edit_reverts_to_last_confirmed() {
        let store = Arc::new(GatedStore::new(
            InMemoryStore::new().with_transactions(&scope(), vec![dated(1, "Tesco", -500)]),
        ));
        store.script_update_failures(&[false, true]);
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        ledger.load().await.unwrap();
        let key = RowKey::Persisted("txn-1".to_string());

        let first = ledger.update_field(&key, FieldPatch::description("A")).unwrap();
        let second = ledger.update_field(&key, FieldPatch::description("B")).unwrap();
        store.gate.add_permits(2);
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok());
        assert!(second.is_err());
        assert_eq!(ledger.transaction(&key).unwrap().description, "A");
    }

    #[tokio::test]
    async fn test_load_does_not_clobber_edit_in_flight() {
        let store = Arc::new(GatedStore::new(
            InMemoryStore::new().with_transactions(&scope(), vec![dated(1, "Tesco", -500)]),
        ));
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        ledger.load().await.unwrap();
        let key = RowKey::Persisted("txn-1".to_string());

        let pending = ledger.update_field(&key, FieldPatch::category("Food")).unwrap();
        let reload = async {
            ledger.load().await.unwrap();
            assert_eq!(ledger.transaction(&key).unwrap().category, "Food");
            store.gate.add_permits(1);
        };
        let (result, ()) = tokio::join!(pending, reload);
        assert!(result.is_ok());
        assert_eq!(ledger.transaction(&key).unwrap().category, "Food");
    }

    #[tokio::test]
    async fn test_update_settled_during_load_survives_it() {
        let (store, ledger) = held(vec![dated(1, "Tesco", -500)]).await;
        let key = RowKey::Persisted("txn-1".to_string());

        let reload = ledger.load();
        tokio::pin!(reload);
        // The store has been read; the reply is held back
        assert!(futures::poll!(reload.as_mut()).is_pending());

        ledger.update_field(&key, FieldPatch::description("X")).unwrap().await.unwrap();
        store.reply.add_permits(1);
        reload.await.unwrap();
        assert_eq!(ledger.transaction(&key).unwrap().description, "X");

        // The next load reads the updated record
        store.reply.add_permits(1);
        ledger.load().await.unwrap();
        assert_eq!(ledger.transaction(&key).unwrap().description, "X");
    }

    #[tokio::test]
    async fn test_stale_load_does_not_reset_confirmed_value() {
        let (store, ledger) = held(vec![dated(1, "Tesco", -500)]).await;
        let key = RowKey::Persisted("txn-1".to_string());

        let reload = ledger.load();
        tokio::pin!(reload);
        assert!(futures::poll!(reload.as_mut()).is_pending());

        ledger.update_field(&key, FieldPatch::description("A")).unwrap().await.unwrap();
        let second = ledger.update_field(&key, FieldPatch::description("B")).unwrap();
        store.reply.add_permits(1);
        reload.await.unwrap();
        assert_eq!(ledger.transaction(&key).unwrap().description, "B");

        // "A" is still the confirmed value, not the "Tesco" the load read
        store.inner.fail_next(StoreOperation::UpdateTransaction, 1);
        assert!(second.await.is_err());
        assert_eq!(ledger.transaction(&key).unwrap().description, "A");
    }

    // ---------- deletes ----------

    #[tokio::test]
    async fn test_scenario_c_failed_delete_stays_removed() {
        let store = seeded(4);
        let ledger = loaded(store.clone(), 15).await;
        let key = RowKey::Persisted("txn-3".to_string());

        store.fail_next(StoreOperation::DeleteTransaction, 1);
        let pending = ledger.delete_transaction(&key).unwrap();
        assert!(ledger.transaction(&key).is_none());

        let err = pending.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MutationFailed);
        assert!(ledger.transaction(&key).is_none());
        assert!(!ledger.page(1).iter().any(|t| t.key() == key));

        let failures: Vec<_> = ledger
            .notifications()
            .into_iter()
            .filter(|n| n.code == ErrorCode::MutationFailed)
            .collect();
        assert_eq!(failures.len(), 1);

        // Still on the server, so an explicit reload brings it back
        ledger.load().await.unwrap();
        assert!(ledger.transaction(&key).is_some());
    }

    #[tokio::test]
    async fn test_delete_unpersisted_row_skips_store() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        let row = dated(2, "Cash", -100);
        let key = row.key();
        ledger.write().push(row);

        ledger.delete_transaction(&key).unwrap().await.unwrap();
        assert!(ledger.is_empty());
        assert_eq!(store.call_count(StoreOperation::DeleteTransaction), 0);
    }

    #[tokio::test]
    async fn test_delete_settled_during_load_stays_removed() {
        let (store, ledger) = held(vec![dated(1, "Tesco", -500), dated(2, "Rent", -90000)]).await;
        let key = RowKey::Persisted("txn-1".to_string());

        let reload = ledger.load();
        tokio::pin!(reload);
        assert!(futures::poll!(reload.as_mut()).is_pending());

        ledger.delete_transaction(&key).unwrap().await.unwrap();
        store.reply.add_permits(1);
        reload.await.unwrap();
        assert!(ledger.transaction(&key).is_none());
        assert_eq!(ledger.len(), 1);

        store.reply.add_permits(1);
        ledger.load().await.unwrap();
        assert!(ledger.transaction(&key).is_none());
    }

    #[tokio::test]
    async fn test_failed_delete_during_load_stays_removed_until_next_load() {
        let (store, ledger) = held(vec![dated(1, "Tesco", -500)]).await;
        let key = RowKey::Persisted("txn-1".to_string());

        let reload = ledger.load();
        tokio::pin!(reload);
        assert!(futures::poll!(reload.as_mut()).is_pending());

        store.inner.fail_next(StoreOperation::DeleteTransaction, 1);
        assert!(ledger.delete_transaction(&key).unwrap().await.is_err());
        store.reply.add_permits(1);
        reload.await.unwrap();
        assert!(ledger.transaction(&key).is_none());

        store.reply.add_permits(1);
        ledger.load().await.unwrap();
        assert!(ledger.transaction(&key).is_some());
    }

    // ---------- categories ----------

    #[tokio::test]
    async fn test_add_category_rolls_back_on_failure() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);

        store.fail_next(StoreOperation::CreateCategory, 1);
        let pending = ledger.add_category("Food").unwrap();
        assert!(ledger.has_category("Food"));

        let err = pending.await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MutationFailed);
        assert!(!ledger.has_category("Food"));
        assert_eq!(ledger.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_add_category_trims_and_dedups() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);

        ledger.add_category("  Travel ").unwrap().await.unwrap();
        ledger.add_category("Travel").unwrap().await.unwrap();
        ledger.add_category("travel").unwrap().await.unwrap();

        let names: Vec<_> = ledger.categories().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Travel", "travel"]);
        assert_eq!(store.call_count(StoreOperation::CreateCategory), 2);
        assert!(matches!(ledger.add_category("   "), Err(CoreError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_category_added_during_load_survives_it() {
        let store = Arc::new(HeldListStore::new(
            InMemoryStore::new().with_categories(&scope(), vec![Category::new("Rent")]),
        ));
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        store.reply.add_permits(1);
        ledger.load_categories().await.unwrap();

        let reload = ledger.load_categories();
        tokio::pin!(reload);
        assert!(futures::poll!(reload.as_mut()).is_pending());

        ledger.add_category("Food").unwrap().await.unwrap();
        store.reply.add_permits(1);
        reload.await.unwrap();
        assert!(ledger.has_category("Food"));
        assert!(ledger.has_category("Rent"));
    }

    #[tokio::test]
    async fn test_same_category_in_flight_shares_failure() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        store.fail_next(StoreOperation::CreateCategory, 1);

        let first = ledger.add_category("Food").unwrap();
        let second = ledger.add_category(" Food ").unwrap();
        let (first, second) = tokio::join!(first, second);

        let error = first.unwrap_err();
        assert_eq!(second.unwrap_err(), error);
        assert!(!ledger.has_category("Food"));
        assert_eq!(store.call_count(StoreOperation::CreateCategory), 1);
        assert_eq!(ledger.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_same_category_in_flight_shares_success() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);

        let first = ledger.add_category("Food").unwrap();
        let second = ledger.add_category("Food").unwrap();
        let (first, second) = tokio::join!(second, first);

        assert!(first.is_ok() && second.is_ok());
        assert!(ledger.has_category("Food"));
        assert_eq!(store.call_count(StoreOperation::CreateCategory), 1);
    }

    #[tokio::test]
    async fn test_dropped_category_add_can_be_retried() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);

        drop(ledger.add_category("Food").unwrap());
        ledger.add_category("Food").unwrap().await.unwrap();
        assert_eq!(store.category_names(&scope()), vec!["Food"]);
    }

    // ---------- creates ----------

    #[tokio::test]
    async fn test_add_transaction_assigns_id() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        let row = dated(4, "Salary", 250000);
        let key = row.key();

        let pending = ledger.add_transaction(row).unwrap();
        assert!(ledger.transaction(&key).is_some());
        pending.await.unwrap();

        let persisted = ledger.transactions().remove(0);
        assert_eq!(persisted.id.as_deref(), Some("txn-1"));
        assert!(ledger.transaction(&key).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_row_unconfirmed() {
        let store = seeded(0);
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        store.fail_next(StoreOperation::CreateTransaction, 1);

        let row = dated(4, "Salary", 250000);
        let key = row.key();
        assert!(ledger.add_transaction(row).unwrap().await.is_err());
        assert!(ledger.transaction(&key).is_some());
        assert_eq!(ledger.summary().pending_transactions, 1);

        // Still pending after a reload
        ledger.load().await.unwrap();
        assert!(ledger.transaction(&key).is_some());
        assert!(matches!(
            ledger.update_field(&key, FieldPatch::description("x")),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_for_deleted_row_is_undone_remotely() {
        let store = Arc::new(GatedStore::new(InMemoryStore::new()));
        let ledger = LedgerController::new(store.clone(), scope(), 15);
        let row = dated(4, "Mistake", -100);
        let key = row.key();

        let create = ledger.add_transaction(row).unwrap();
        ledger.delete_transaction(&key).unwrap().await.unwrap();
        store.gate.add_permits(1);
        create.await.unwrap();

        assert!(ledger.is_empty());
        assert!(store.inner.snapshot(&scope()).is_empty());
    }

    #[tokio::test]
    async fn test_create_settled_during_load_survives_it() {
        let (store, ledger) = held(vec![dated(1, "Tesco", -500)]).await;

        let reload = ledger.load();
        tokio::pin!(reload);
        assert!(futures::poll!(reload.as_mut()).is_pending());

        ledger.add_transaction(dated(4, "Salary", 250000)).unwrap().await.unwrap();
        store.reply.add_permits(1);
        reload.await.unwrap();
        assert!(ledger.find_by_id("txn-2").is_some());
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_add_transaction_validation() {
        let ledger = LedgerController::new(seeded(0), scope(), 15);
        assert!(matches!(
            ledger.add_transaction(Transaction::new("x", 1, "soon")),
            Err(CoreError::InvalidDate { .. })
        ));
        assert!(matches!(
            ledger.add_transaction(dated(1, "x", 1).with_id("t")),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    // ---------- misc ----------

    #[tokio::test]
    async fn test_summary_totals() {
        let store = Arc::new(InMemoryStore::new().with_transactions(
            &scope(),
            vec![
                dated(1, "Salary", 300000).with_category("Income"),
                dated(2, "Rent", -120000).with_category("Housing"),
                dated(3, "Adjustment", 0),
            ],
        ));
        let ledger = loaded(store, 15).await;
        let summary = ledger.summary();
        assert_eq!(summary.total_transactions, 3);
        assert_eq!(summary.total_credit, 300000);
        assert_eq!(summary.total_debit, -120000);
        assert_eq!(summary.net, 180000);
        assert_eq!(summary.uncategorised, 1);
    }

    #[derive(Default)]
    struct RecordingLogger {
        entries: Arc<Mutex<Vec<(ErrorCode, String, Option<String>)>>>,
    }

    impl ErrorLogger for RecordingLogger {
        fn log_error(&self, error: &CoreError, context: &ErrorContext) {
            self.entries.lock().unwrap().push((
                error.code(),
                context.operation.clone(),
                context.row.clone(),
            ));
        }
    }

    #[tokio::test]
    async fn test_failures_are_logged_once_with_row() {
        let store = seeded(2);
        let logger = RecordingLogger::default();
        let entries = logger.entries.clone();
        let ledger = LedgerController::new(store.clone(), scope(), 15).with_logger(Box::new(logger));
        ledger.load().await.unwrap();

        store.fail_next(StoreOperation::DeleteTransaction, 1);
        let key = RowKey::Persisted("txn-2".to_string());
        assert!(ledger.delete_transaction(&key).unwrap().await.is_err());

        assert_eq!(
            *entries.lock().unwrap(),
            vec![(
                ErrorCode::MutationFailed,
                "delete_transaction".to_string(),
                Some("txn-2".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_dispatch_routes_intents() {
        let ledger = loaded(seeded(2), 15).await;
        let key = RowKey::Persisted("txn-1".to_string());

        ledger
            .dispatch(RowIntent::AddCategory { name: "Gifts".to_string() })
            .unwrap()
            .await
            .unwrap();
        ledger
            .dispatch(RowIntent::Update { key: key.clone(), patch: FieldPatch::category("Gifts") })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(ledger.transaction(&key).unwrap().category, "Gifts");

        ledger.dispatch(RowIntent::Delete { key: key.clone() }).unwrap().await.unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
