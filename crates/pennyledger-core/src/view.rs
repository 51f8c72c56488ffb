//! Ledger view: per-row state and ledger-wide overlays
//!
//! Tracks which row is being edited, which action menu is open and which row
//! is hovered. At most one row is active and at most one menu is open across
//! the whole ledger. A single click-outside listener closes whichever overlay
//! is open.

use pennyledger_utils::{format_date_or_placeholder, CurrencyFormat};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::CoreResult;
use crate::ledger::LedgerController;
use crate::models::{RowKey, Transaction};
use crate::row::{CategoryChoice, RowIntent, RowMachine, RowStateTag};

/// Where a pointer press started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerOrigin {
    /// Inside the overlay anchored to this row
    Overlay(RowKey),
    /// Anywhere else
    Outside,
}

/// Document-level pointer listener, one per view
#[derive(Debug, Default)]
pub struct ClickOutsideListener {
    registered: bool,
}

impl ClickOutsideListener {
    fn register(&mut self) {
        self.registered = true;
        log::debug!("click-outside listener registered");
    }

    fn unregister(&mut self) {
        if self.registered {
            self.registered = false;
            log::debug!("click-outside listener unregistered");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

/// One rendered row
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    #[serde(skip)]
    pub key: RowKey,
    pub id: Option<String>,
    pub date: String,
    pub description: String,
    pub category: String,
    pub amount: String,
    pub is_credit: bool,
    pub pending: bool,
    pub state: RowStateTag,
    pub actions_visible: bool,
    pub menu_open: bool,
}

/// One rendered page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub page: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    pub rows: Vec<RowView>,
}

#[derive(Debug)]
pub struct LedgerView {
    rows: HashMap<RowKey, RowMachine>,
    active: Option<RowKey>,
    open_menu: Option<RowKey>,
    hovered: Option<RowKey>,
    listener: ClickOutsideListener,
}

impl Default for LedgerView {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerView {
    pub fn new() -> Self {
        let mut listener = ClickOutsideListener::default();
        listener.register();
        Self {
            rows: HashMap::new(),
            active: None,
            open_menu: None,
            hovered: None,
            listener,
        }
    }

    pub fn listener(&self) -> &ClickOutsideListener {
        &self.listener
    }

    pub fn row_state(&self, key: &RowKey) -> RowStateTag {
        self.rows
            .get(key)
            .map(RowMachine::tag)
            .unwrap_or(RowStateTag::Viewing)
    }

    pub fn active_row(&self) -> Option<&RowKey> {
        self.active.as_ref()
    }

    pub fn open_menu(&self) -> Option<&RowKey> {
        self.open_menu.as_ref()
    }

    fn machine(&mut self, key: &RowKey) -> &mut RowMachine {
        self.rows.entry(key.clone()).or_default()
    }

    fn cancel_active(&mut self) {
        if let Some(key) = self.active.take() {
            if let Some(machine) = self.rows.get_mut(&key) {
                machine.cancel();
            }
        }
    }

    /// Make `key` the only row allowed an overlay
    fn focus(&mut self, key: &RowKey) {
        if self.active.as_ref() != Some(key) {
            self.cancel_active();
        }
        self.open_menu = None;
    }

    /// Run `start` on a copy of the row's machine and focus the row only if
    /// the transition is accepted
    fn activate<F>(&mut self, key: RowKey, start: F) -> CoreResult<()>
    where
        F: FnOnce(&mut RowMachine) -> CoreResult<()>,
    {
        let mut machine = self.rows.get(&key).cloned().unwrap_or_default();
        start(&mut machine)?;
        self.focus(&key);
        self.rows.insert(key.clone(), machine);
        self.active = Some(key);
        Ok(())
    }

    // ==================== Menus and hover ====================

    /// Open the row's action menu, or close it if it is the open one.
    ///
    /// Opening a menu cancels any edit or delete confirmation, including one
    /// on the same row.
    pub fn toggle_menu(&mut self, key: &RowKey) {
        if self.open_menu.as_ref() == Some(key) {
            self.open_menu = None;
            return;
        }
        self.cancel_active();
        self.open_menu = Some(key.clone());
    }

    pub fn close_menu(&mut self) {
        self.open_menu = None;
    }

    pub fn hover(&mut self, key: &RowKey) {
        self.hovered = Some(key.clone());
    }

    pub fn unhover(&mut self) {
        self.hovered = None;
    }

    /// Row actions show while hovered or while the row's menu is open
    pub fn actions_visible(&self, key: &RowKey) -> bool {
        self.hovered.as_ref() == Some(key) || self.open_menu.as_ref() == Some(key)
    }

    /// Handle a document-level pointer press.
    ///
    /// Returns whether an overlay was closed.
    pub fn pointer_down(&mut self, origin: &PointerOrigin) -> bool {
        if !self.listener.is_registered() {
            return false;
        }
        if let PointerOrigin::Overlay(key) = origin {
            if self.open_menu.as_ref() == Some(key) || self.active.as_ref() == Some(key) {
                return false;
            }
        }
        let closed = self.open_menu.is_some() || self.active.is_some();
        self.open_menu = None;
        self.cancel_active();
        closed
    }

    // ==================== Row operations ====================

    pub fn begin_edit_description(&mut self, transaction: &Transaction) -> CoreResult<()> {
        self.activate(transaction.key(), |machine| {
            machine.begin_edit_description(&transaction.description)
        })
    }

    pub fn begin_edit_category(&mut self, transaction: &Transaction) -> CoreResult<()> {
        self.activate(transaction.key(), |machine| {
            machine.begin_edit_category(&transaction.category)
        })
    }

    pub fn input(&mut self, key: &RowKey, text: &str) {
        if let Some(machine) = self.rows.get_mut(key) {
            machine.input(text);
        }
    }

    pub fn select_category(&mut self, key: &RowKey, choice: CategoryChoice) -> CoreResult<()> {
        self.machine(key).select_category(choice)
    }

    pub fn cancel_create_new(&mut self, key: &RowKey) {
        if let Some(machine) = self.rows.get_mut(key) {
            machine.cancel_create_new();
        }
    }

    pub fn commit_new_category(&mut self, key: &RowKey) -> CoreResult<RowIntent> {
        self.machine(key).commit_new_category()
    }

    pub fn save(&mut self, key: &RowKey) -> CoreResult<Option<RowIntent>> {
        let intent = self.machine(key).save(key)?;
        if self.active.as_ref() == Some(key) {
            self.active = None;
        }
        Ok(intent)
    }

    pub fn cancel(&mut self, key: &RowKey) {
        if let Some(machine) = self.rows.get_mut(key) {
            machine.cancel();
        }
        if self.active.as_ref() == Some(key) {
            self.active = None;
        }
    }

    pub fn request_delete(&mut self, key: &RowKey) -> CoreResult<()> {
        self.activate(key.clone(), RowMachine::request_delete)
    }

    pub fn cancel_delete(&mut self, key: &RowKey) {
        self.cancel(key);
    }

    pub fn confirm_delete(&mut self, key: &RowKey) -> CoreResult<RowIntent> {
        let intent = self.machine(key).confirm_delete(key)?;
        self.active = None;
        if self.hovered.as_ref() == Some(key) {
            self.hovered = None;
        }
        Ok(intent)
    }

    /// Drop all state held for a row
    pub fn forget(&mut self, key: &RowKey) {
        self.rows.remove(key);
        for slot in [&mut self.active, &mut self.open_menu, &mut self.hovered] {
            if slot.as_ref() == Some(key) {
                *slot = None;
            }
        }
    }

    /// Forget rows the ledger no longer holds
    pub fn prune(&mut self, ledger: &LedgerController) {
        let live: HashSet<RowKey> = ledger.transactions().iter().map(Transaction::key).collect();
        let stale: Vec<RowKey> = self
            .rows
            .keys()
            .chain(self.open_menu.iter())
            .chain(self.hovered.iter())
            .filter(|k| !live.contains(*k))
            .cloned()
            .collect();
        for key in stale {
            self.forget(&key);
        }
    }

    /// Close every overlay and stop listening for pointer events
    pub fn teardown(&mut self) {
        self.cancel_active();
        self.open_menu = None;
        self.hovered = None;
        self.listener.unregister();
    }

    // ==================== Rendering ====================

    pub fn render_page(&self, ledger: &LedgerController, currency: &CurrencyFormat) -> PageView {
        let page = ledger.current_page();
        let rows = ledger
            .page(page)
            .iter()
            .map(|transaction| self.render_row(transaction, currency))
            .collect();
        PageView {
            page,
            total_pages: ledger.total_pages(),
            total_rows: ledger.len(),
            rows,
        }
    }

    fn render_row(&self, transaction: &Transaction, currency: &CurrencyFormat) -> RowView {
        let key = transaction.key();
        let machine = self.rows.get(&key);
        let (description, category) = match machine {
            Some(machine) => (
                machine.display_description(transaction),
                machine.display_category(transaction),
            ),
            None => (transaction.description.clone(), transaction.category.clone()),
        };
        RowView {
            id: transaction.id.clone(),
            date: format_date_or_placeholder(&transaction.transaction_date_time),
            description,
            category,
            amount: currency.format(transaction.amount),
            is_credit: transaction.is_credit(),
            pending: !transaction.is_persisted(),
            state: self.row_state(&key),
            actions_visible: self.actions_visible(&key),
            menu_open: self.open_menu.as_ref() == Some(&key),
            key,
        }
    }
}
