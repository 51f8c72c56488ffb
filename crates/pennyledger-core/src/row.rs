//! Per-row edit state machine
//!
//! A row is viewed, edited one field at a time, or waiting on delete
//! confirmation. Leaving an edit through save yields a [`RowIntent`] for the
//! ledger; nothing here talks to the store.

use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::models::{FieldPatch, RowKey, Transaction};

/// Request produced by a row for the ledger controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIntent {
    Update { key: RowKey, patch: FieldPatch },
    AddCategory { name: String },
    Delete { key: RowKey },
}

/// Sub-state of a category edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryEditMode {
    SelectingExisting,
    CreatingNew { draft: String },
}

/// Option picked in the category selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryChoice {
    Existing(String),
    /// Sentinel entry that opens the new-category input
    CreateNew,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RowState {
    #[default]
    Viewing,
    EditingDescription {
        buffer: String,
        original: String,
    },
    EditingCategory {
        mode: CategoryEditMode,
        selected: String,
        original: String,
    },
    ConfirmingDelete,
    /// Terminal; the row was deleted
    Removed,
}

/// State name as rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStateTag {
    Viewing,
    EditingDescription,
    SelectingCategory,
    CreatingCategory,
    ConfirmingDelete,
    Removed,
}

#[derive(Debug, Clone, Default)]
pub struct RowMachine {
    state: RowState,
}

impl RowMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RowState {
        &self.state
    }

    pub fn tag(&self) -> RowStateTag {
        match &self.state {
            RowState::Viewing => RowStateTag::Viewing,
            RowState::EditingDescription { .. } => RowStateTag::EditingDescription,
            RowState::EditingCategory {
                mode: CategoryEditMode::SelectingExisting,
                ..
            } => RowStateTag::SelectingCategory,
            RowState::EditingCategory {
                mode: CategoryEditMode::CreatingNew { .. },
                ..
            } => RowStateTag::CreatingCategory,
            RowState::ConfirmingDelete => RowStateTag::ConfirmingDelete,
            RowState::Removed => RowStateTag::Removed,
        }
    }

    /// Editing or confirming
    pub fn is_active(&self) -> bool {
        !matches!(self.state, RowState::Viewing | RowState::Removed)
    }

    pub fn is_removed(&self) -> bool {
        matches!(self.state, RowState::Removed)
    }

    fn expect_viewing(&self, action: &str) -> CoreResult<()> {
        match self.state {
            RowState::Viewing => Ok(()),
            _ => Err(CoreError::invalid_input(format!(
                "cannot {} while the row is {:?}",
                action,
                self.tag()
            ))),
        }
    }

    pub fn begin_edit_description(&mut self, current: &str) -> CoreResult<()> {
        self.expect_viewing("edit description")?;
        self.state = RowState::EditingDescription {
            buffer: current.to_string(),
            original: current.to_string(),
        };
        Ok(())
    }

    pub fn begin_edit_category(&mut self, current: &str) -> CoreResult<()> {
        self.expect_viewing("edit category")?;
        self.state = RowState::EditingCategory {
            mode: CategoryEditMode::SelectingExisting,
            selected: current.to_string(),
            original: current.to_string(),
        };
        Ok(())
    }

    /// Replace the text being typed; ignored when nothing accepts text
    pub fn input(&mut self, text: &str) {
        match &mut self.state {
            RowState::EditingDescription { buffer, .. } => *buffer = text.to_string(),
            RowState::EditingCategory {
                mode: CategoryEditMode::CreatingNew { draft },
                ..
            } => *draft = text.to_string(),
            _ => {}
        }
    }

    /// Pick an option in the category selector
    pub fn select_category(&mut self, choice: CategoryChoice) -> CoreResult<()> {
        match &mut self.state {
            RowState::EditingCategory { mode, selected, .. } => {
                match choice {
                    CategoryChoice::Existing(name) => {
                        *selected = name;
                        *mode = CategoryEditMode::SelectingExisting;
                    }
                    CategoryChoice::CreateNew => {
                        *mode = CategoryEditMode::CreatingNew {
                            draft: String::new(),
                        };
                    }
                }
                Ok(())
            }
            _ => Err(CoreError::invalid_input("no category edit in progress")),
        }
    }

    pub fn choose_create_new(&mut self) -> CoreResult<()> {
        self.select_category(CategoryChoice::CreateNew)
    }

    /// Leave the new-category input, keeping the previous selection
    pub fn cancel_create_new(&mut self) {
        if let RowState::EditingCategory { mode, .. } = &mut self.state {
            *mode = CategoryEditMode::SelectingExisting;
        }
    }

    /// Accept the typed category name and select it.
    ///
    /// Blank names are rejected and leave the state as it was.
    pub fn commit_new_category(&mut self) -> CoreResult<RowIntent> {
        let RowState::EditingCategory { mode, selected, .. } = &mut self.state else {
            return Err(CoreError::invalid_input("no category edit in progress"));
        };
        let CategoryEditMode::CreatingNew { draft } = mode else {
            return Err(CoreError::invalid_input("not creating a category"));
        };

        let name = draft.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::invalid_input("category name cannot be empty"));
        }

        *selected = name.clone();
        *mode = CategoryEditMode::SelectingExisting;
        Ok(RowIntent::AddCategory { name })
    }

    /// Close the edit and return the update to send, if the value changed.
    ///
    /// The row returns to viewing immediately, before any remote reply.
    pub fn save(&mut self, key: &RowKey) -> CoreResult<Option<RowIntent>> {
        let patch = match &self.state {
            RowState::EditingDescription { buffer, original } => {
                (buffer != original).then(|| FieldPatch::description(buffer))
            }
            RowState::EditingCategory {
                mode: CategoryEditMode::CreatingNew { .. },
                ..
            } => {
                return Err(CoreError::invalid_input(
                    "commit or cancel the new category first",
                ))
            }
            RowState::EditingCategory {
                selected, original, ..
            } => (selected != original).then(|| FieldPatch::category(selected)),
            _ => return Err(CoreError::invalid_input("no edit in progress")),
        };

        self.state = RowState::Viewing;
        Ok(patch.map(|patch| RowIntent::Update {
            key: key.clone(),
            patch,
        }))
    }

    /// Drop any edit or pending confirmation
    pub fn cancel(&mut self) {
        if self.is_active() {
            log::debug!("row edit cancelled from {:?}", self.tag());
            self.state = RowState::Viewing;
        }
    }

    pub fn request_delete(&mut self) -> CoreResult<()> {
        self.expect_viewing("delete")?;
        self.state = RowState::ConfirmingDelete;
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        if self.state == RowState::ConfirmingDelete {
            self.state = RowState::Viewing;
        }
    }

    pub fn confirm_delete(&mut self, key: &RowKey) -> CoreResult<RowIntent> {
        if self.state != RowState::ConfirmingDelete {
            return Err(CoreError::invalid_input("delete was not requested"));
        }
        self.state = RowState::Removed;
        Ok(RowIntent::Delete { key: key.clone() })
    }

    pub fn display_description(&self, transaction: &Transaction) -> String {
        match &self.state {
            RowState::EditingDescription { buffer, .. } => buffer.clone(),
            _ => transaction.description.clone(),
        }
    }

    pub fn display_category(&self, transaction: &Transaction) -> String {
        match &self.state {
            RowState::EditingCategory { selected, .. } => selected.clone(),
            _ => transaction.category.clone(),
        }
    }
}
