//! Bulk import: preview, review, confirm
//!
//! Records arrive already parsed. A preview validates them, suggests
//! categories and flags likely duplicates; nothing reaches the ledger until
//! the store has persisted the whole batch.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, CoreResult, ErrorContext};
use crate::ledger::LedgerController;
use crate::models::{Category, RowKey, Transaction};

/// Transaction-shaped record produced by a file parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub description: String,
    pub amount: i64,
    pub transaction_date_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_reference: Option<String>,
}

impl ImportRecord {
    pub fn new(description: &str, amount: i64, transaction_date_time: &str) -> Self {
        Self {
            description: description.to_string(),
            amount,
            transaction_date_time: transaction_date_time.to_string(),
            category: None,
            bank_reference: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_bank_reference(mut self, reference: &str) -> Self {
        self.bank_reference = Some(reference.to_string());
        self
    }

    fn into_transaction(self) -> Transaction {
        Transaction {
            id: None,
            description: self.description,
            amount: self.amount,
            category: self.category.unwrap_or_default(),
            transaction_date_time: self.transaction_date_time,
            bank_reference: self.bank_reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRow {
    /// Record as it will be sent, category filled in from the suggestion
    pub transaction: Transaction,
    /// Category picked by keyword match, when the record had none
    pub suggested_category: Option<String>,
    /// Matches a row already in the ledger or earlier in the batch
    pub possible_duplicate: bool,
}

/// Reviewable batch of unpersisted records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewBatch {
    rows: Vec<PreviewRow>,
}

impl PreviewBatch {
    pub fn rows(&self) -> &[PreviewRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.rows.iter().filter(|r| r.possible_duplicate).count()
    }

    /// Drop a record from the batch
    pub fn remove(&mut self, index: usize) -> CoreResult<PreviewRow> {
        if index >= self.rows.len() {
            return Err(CoreError::invalid_input(format!("no preview row {}", index)));
        }
        Ok(self.rows.remove(index))
    }

    pub fn set_category(&mut self, index: usize, name: &str) -> CoreResult<()> {
        let row = self
            .rows
            .get_mut(index)
            .ok_or_else(|| CoreError::invalid_input(format!("no preview row {}", index)))?;
        row.transaction.category = name.trim().to_string();
        Ok(())
    }

    /// Row keys of the records in the batch
    pub fn keys(&self) -> Vec<RowKey> {
        self.rows.iter().map(|r| r.transaction.key()).collect()
    }

    fn into_transactions(self) -> Vec<Transaction> {
        self.rows.into_iter().map(|r| r.transaction).collect()
    }
}

fn suggest_category(description: &str, categories: &[Category]) -> Option<String> {
    categories
        .iter()
        .find(|c| c.matches(description))
        .map(|c| c.name.clone())
}

/// Build a preview batch against a category set and the rows already held
pub fn preview(
    records: Vec<ImportRecord>,
    categories: &[Category],
    existing: &[Transaction],
) -> CoreResult<PreviewBatch> {
    let mut references: HashSet<String> = existing
        .iter()
        .filter_map(|t| t.bank_reference.clone())
        .collect();
    let mut contents: HashSet<RowKey> = existing.iter().map(content_key).collect();

    let mut rows = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        if record.transaction_date_time.trim().is_empty()
            || pennyledger_utils::parse_timestamp(&record.transaction_date_time).is_none()
        {
            return Err(CoreError::invalid_input(format!(
                "row {}: unparseable date '{}'",
                index + 1,
                record.transaction_date_time
            )));
        }

        let mut transaction = record.into_transaction();
        let suggested_category = if transaction.is_uncategorised() {
            suggest_category(&transaction.description, categories)
        } else {
            None
        };
        if let Some(ref name) = suggested_category {
            transaction.category = name.clone();
        }

        let by_reference = match transaction.bank_reference {
            Some(ref reference) => !references.insert(reference.clone()),
            None => false,
        };
        let by_content = !contents.insert(content_key(&transaction));

        rows.push(PreviewRow {
            transaction,
            suggested_category,
            possible_duplicate: by_reference || by_content,
        });
    }

    log::debug!(
        "import preview: {} rows, {} possible duplicates",
        rows.len(),
        rows.iter().filter(|r| r.possible_duplicate).count()
    );
    Ok(PreviewBatch { rows })
}

/// Content key, ignoring any id
fn content_key(transaction: &Transaction) -> RowKey {
    RowKey::Pending {
        date_time: transaction.transaction_date_time.clone(),
        description: transaction.description.clone(),
        amount: transaction.amount,
    }
}

/// Import flow bound to one ledger
pub struct ImportReconciler<'a> {
    ledger: &'a LedgerController,
}

impl<'a> ImportReconciler<'a> {
    pub fn new(ledger: &'a LedgerController) -> Self {
        Self { ledger }
    }

    /// Preview against the ledger's current categories and rows
    pub fn preview(&self, records: Vec<ImportRecord>) -> CoreResult<PreviewBatch> {
        preview(records, &self.ledger.categories(), &self.ledger.transactions())
    }

    /// Persist the batch and merge the stored records into the ledger.
    ///
    /// On failure the ledger is left as it was and an `ImportFailed`
    /// notification carries the store's message.
    pub async fn confirm(&self, batch: PreviewBatch) -> CoreResult<Vec<Transaction>> {
        if batch.is_empty() {
            return Err(CoreError::invalid_input("import batch is empty"));
        }

        let keys = batch.keys();
        let submitted = batch.len();
        let result = self
            .ledger
            .store()
            .import_transactions(self.ledger.scope(), batch.into_transactions())
            .await;

        let persisted = match result {
            Ok(persisted) => persisted,
            Err(e) => {
                let error = CoreError::ImportFailed {
                    message: e.to_string(),
                };
                let context = ErrorContext::new("import_transactions")
                    .with_user_id(&self.ledger.scope().user_id);
                self.ledger.record_failure(&error, context);
                return Err(error);
            }
        };

        if !self.ledger.is_alive() {
            return Err(CoreError::Discarded {
                reason: "ledger was torn down".to_string(),
            });
        }

        let added = self.ledger.apply_import(&keys, persisted.clone());
        log::info!(
            "imported {} of {} records for {} ({} new rows)",
            persisted.len(),
            submitted,
            self.ledger.scope().user_id,
            added
        );
        Ok(persisted)
    }
}
