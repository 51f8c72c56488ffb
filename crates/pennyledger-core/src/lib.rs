//! Transaction ledger state, reconciliation and import logic
//!
//! [`LedgerController`] owns the collection and talks to a
//! [`TransactionStore`]; [`LedgerView`] tracks per-row UI state on top of it;
//! [`ImportReconciler`] previews and merges bulk imports.

pub mod error;
pub mod import;
mod lane;
pub mod ledger;
pub mod models;
pub mod row;
pub mod store;
pub mod view;

pub use error::{
    CoreError, CoreResult, DefaultErrorLogger, ErrorCode, ErrorContext, ErrorDetails, ErrorLogger,
    ErrorSeverity, Notification,
};
pub use import::{preview, ImportReconciler, ImportRecord, PreviewBatch, PreviewRow};
pub use ledger::{LedgerController, PendingMutation};
pub use models::{Category, Field, FieldPatch, LedgerSummary, RowKey, Transaction, UserScope};
pub use row::{CategoryChoice, CategoryEditMode, RowIntent, RowMachine, RowState, RowStateTag};
pub use store::{InMemoryStore, StoreError, StoreOperation, StoreRef, TransactionStore};
pub use view::{ClickOutsideListener, LedgerView, PageView, PointerOrigin, RowView};
