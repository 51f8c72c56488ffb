//! Core data models for the ledger

use chrono::{DateTime, FixedOffset};
use pennyledger_utils::parse_timestamp;
use serde::{Deserialize, Serialize};

/// Transaction record as held by the ledger and the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Store-assigned identifier, absent until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-text description
    pub description: String,
    /// Signed amount in minor units (pence); positive is a credit
    pub amount: i64,
    /// Category label, empty when uncategorised
    #[serde(default)]
    pub category: String,
    /// ISO-8601 timestamp as produced by the source
    pub transaction_date_time: String,
    /// Reference supplied by the bank, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_reference: Option<String>,
}

impl Transaction {
    /// Create an unpersisted transaction
    pub fn new(description: &str, amount: i64, transaction_date_time: &str) -> Self {
        Self {
            id: None,
            description: description.to_string(),
            amount,
            category: String::new(),
            transaction_date_time: transaction_date_time.to_string(),
            bank_reference: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_bank_reference(mut self, reference: &str) -> Self {
        self.bank_reference = Some(reference.to_string());
        self
    }

    /// Row identity used by the view
    pub fn key(&self) -> RowKey {
        match &self.id {
            Some(id) => RowKey::Persisted(id.clone()),
            None => RowKey::Pending {
                date_time: self.transaction_date_time.clone(),
                description: self.description.clone(),
                amount: self.amount,
            },
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }

    pub fn is_uncategorised(&self) -> bool {
        self.category.is_empty()
    }

    /// Parsed timestamp, `None` when unparseable
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.transaction_date_time)
    }

    pub(crate) fn field(&self, field: Field) -> &str {
        match field {
            Field::Description => &self.description,
            Field::Category => &self.category,
        }
    }

    pub(crate) fn set_field(&mut self, field: Field, value: String) {
        match field {
            Field::Description => self.description = value,
            Field::Category => self.category = value,
        }
    }
}

/// Identity of a row in the ledger view.
///
/// Unpersisted rows are keyed by their content. That key is unstable and
/// never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Persisted(String),
    Pending {
        date_time: String,
        description: String,
        amount: i64,
    },
}

impl RowKey {
    /// Store identifier, only for persisted rows
    pub fn id(&self) -> Option<&str> {
        match self {
            RowKey::Persisted(id) => Some(id),
            RowKey::Pending { .. } => None,
        }
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        match (self, &transaction.id) {
            (RowKey::Persisted(id), Some(other)) => id == other,
            (
                RowKey::Pending {
                    date_time,
                    description,
                    amount,
                },
                None,
            ) => {
                *date_time == transaction.transaction_date_time
                    && *description == transaction.description
                    && *amount == transaction.amount
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Persisted(id) => write!(f, "{}", id),
            RowKey::Pending {
                date_time,
                description,
                amount,
            } => write!(f, "pending:{}|{}|{}", date_time, description, amount),
        }
    }
}

/// Editable transaction fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Description,
    Category,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Description => write!(f, "description"),
            Field::Category => write!(f, "category"),
        }
    }
}

/// Partial update of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl FieldPatch {
    pub fn description(value: &str) -> Self {
        Self {
            description: Some(value.to_string()),
            category: None,
        }
    }

    pub fn category(value: &str) -> Self {
        Self {
            description: None,
            category: Some(value.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.category.is_none()
    }

    /// Fields carried by the patch, in a fixed order
    pub fn fields(&self) -> Vec<(Field, &str)> {
        let mut fields = Vec::new();
        if let Some(ref description) = self.description {
            fields.push((Field::Description, description.as_str()));
        }
        if let Some(ref category) = self.category {
            fields.push((Field::Category, category.as_str()));
        }
        fields
    }
}

/// User category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Unique name, compared case-sensitively
    pub name: String,
    /// Description fragments that suggest this category on import
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Category {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keywords: vec![],
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Case-insensitive keyword match against a description
    pub fn matches(&self, description: &str) -> bool {
        let description = description.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .any(|k| description.contains(&k.to_lowercase()))
    }
}

/// User/session scope every store call is made for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserScope {
    pub user_id: String,
}

impl UserScope {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
        }
    }
}

/// Ledger summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_transactions: usize,
    pub pending_transactions: usize,
    pub uncategorised: usize,
    /// Sum of positive amounts, minor units
    pub total_credit: i64,
    /// Sum of negative amounts, minor units
    pub total_debit: i64,
    pub net: i64,
}
