//! Remote transaction store contract
//!
//! The store is the only durable source of truth. The ledger treats it as an
//! opaque asynchronous service; [`InMemoryStore`] is the local implementation
//! used by the binary and by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::{Category, FieldPatch, Transaction, UserScope};

/// Errors reported by a store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("not authorised for this user")]
    Unauthorized,

    #[error("no transaction with id {id}")]
    NotFound { id: String },

    #[error("rejected: {message}")]
    Rejected { message: String },
}

/// Store reference type
pub type StoreRef = Arc<dyn TransactionStore>;

/// Operations a store exposes
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// List every transaction visible to the scope, in no particular order
    async fn list_transactions(&self, scope: &UserScope) -> Result<Vec<Transaction>, StoreError>;

    /// Persist a new transaction and return it with its assigned id
    async fn create_transaction(
        &self,
        scope: &UserScope,
        transaction: Transaction,
    ) -> Result<Transaction, StoreError>;

    /// Apply a partial update
    async fn update_transaction(
        &self,
        scope: &UserScope,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<(), StoreError>;

    async fn delete_transaction(&self, scope: &UserScope, id: &str) -> Result<(), StoreError>;

    /// Persist a batch of new transactions, all or nothing
    async fn import_transactions(
        &self,
        scope: &UserScope,
        records: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn list_categories(&self, scope: &UserScope) -> Result<Vec<Category>, StoreError>;

    async fn create_category(&self, scope: &UserScope, name: &str) -> Result<(), StoreError>;
}

/// Store operation tag, used for failure injection and call counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    ListTransactions,
    CreateTransaction,
    UpdateTransaction,
    DeleteTransaction,
    ImportTransactions,
    ListCategories,
    CreateCategory,
}

#[derive(Debug, Default)]
struct StoreData {
    transactions: HashMap<String, Vec<Transaction>>,
    categories: HashMap<String, Vec<Category>>,
    next_id: u64,
    failures: HashMap<StoreOperation, usize>,
    calls: HashMap<StoreOperation, usize>,
}

impl StoreData {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("txn-{}", self.next_id)
    }

    /// Record the call and consume an injected failure if one is queued
    fn begin(&mut self, operation: StoreOperation) -> Result<(), StoreError> {
        *self.calls.entry(operation).or_insert(0) += 1;
        match self.failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable {
                    message: format!("injected failure for {:?}", operation),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Process-local store keyed by user
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: Mutex<StoreData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed transactions for a scope, assigning ids where missing
    pub fn with_transactions(self, scope: &UserScope, transactions: Vec<Transaction>) -> Self {
        {
            let mut data = self.data();
            let mut seeded = Vec::with_capacity(transactions.len());
            for mut transaction in transactions {
                if transaction.id.is_none() {
                    transaction.id = Some(data.next_id());
                }
                seeded.push(transaction);
            }
            data.transactions
                .entry(scope.user_id.clone())
                .or_default()
                .extend(seeded);
        }
        self
    }

    pub fn with_categories(self, scope: &UserScope, categories: Vec<Category>) -> Self {
        self.data()
            .categories
            .entry(scope.user_id.clone())
            .or_default()
            .extend(categories);
        self
    }

    /// Make the next `times` calls of `operation` fail
    pub fn fail_next(&self, operation: StoreOperation, times: usize) {
        *self.data().failures.entry(operation).or_insert(0) += times;
    }

    /// Calls of `operation` made so far
    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.data().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Current records held for a scope
    pub fn snapshot(&self, scope: &UserScope) -> Vec<Transaction> {
        self.data()
            .transactions
            .get(&scope.user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn category_names(&self, scope: &UserScope) -> Vec<String> {
        self.data()
            .categories
            .get(&scope.user_id)
            .map(|c| c.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn list_transactions(&self, scope: &UserScope) -> Result<Vec<Transaction>, StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::ListTransactions)?;
        Ok(data
            .transactions
            .get(&scope.user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_transaction(
        &self,
        scope: &UserScope,
        mut transaction: Transaction,
    ) -> Result<Transaction, StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::CreateTransaction)?;
        transaction.id = Some(data.next_id());
        data.transactions
            .entry(scope.user_id.clone())
            .or_default()
            .push(transaction.clone());
        Ok(transaction)
    }

    async fn update_transaction(
        &self,
        scope: &UserScope,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<(), StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::UpdateTransaction)?;
        let transaction = data
            .transactions
            .get_mut(&scope.user_id)
            .and_then(|list| list.iter_mut().find(|t| t.id.as_deref() == Some(id)))
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        for (field, value) in patch.fields() {
            transaction.set_field(field, value.to_string());
        }
        Ok(())
    }

    async fn delete_transaction(&self, scope: &UserScope, id: &str) -> Result<(), StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::DeleteTransaction)?;
        let list = data.transactions.entry(scope.user_id.clone()).or_default();
        let before = list.len();
        list.retain(|t| t.id.as_deref() != Some(id));
        if list.len() == before {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn import_transactions(
        &self,
        scope: &UserScope,
        records: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::ImportTransactions)?;
        if records.iter().any(|r| r.id.is_some()) {
            return Err(StoreError::Rejected {
                message: "imported records must not carry ids".to_string(),
            });
        }
        let mut persisted = Vec::with_capacity(records.len());
        for mut record in records {
            record.id = Some(data.next_id());
            persisted.push(record);
        }
        data.transactions
            .entry(scope.user_id.clone())
            .or_default()
            .extend(persisted.iter().cloned());
        Ok(persisted)
    }

    async fn list_categories(&self, scope: &UserScope) -> Result<Vec<Category>, StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::ListCategories)?;
        Ok(data.categories.get(&scope.user_id).cloned().unwrap_or_default())
    }

    async fn create_category(&self, scope: &UserScope, name: &str) -> Result<(), StoreError> {
        let mut data = self.data();
        data.begin(StoreOperation::CreateCategory)?;
        let categories = data.categories.entry(scope.user_id.clone()).or_default();
        if !categories.iter().any(|c| c.name == name) {
            categories.push(Category::new(name));
        }
        Ok(())
    }
}
