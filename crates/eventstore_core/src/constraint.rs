use serde::{Deserialize, Serialize};

/// Instance id under which global constraints are stored.
pub const GLOBAL_INSTANCE: &str = "";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintAction {
    Add,
    Remove,
    /// Drops every constraint of the instance.
    RemoveInstance,
}

/// A uniqueness fact written together with the events of an append.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub unique_type: String,
    pub field: String,
    pub action: ConstraintAction,
    /// Message reported instead of the default one when an add collides.
    pub error_message: Option<String>,
    /// Unique across all instances instead of within the appending one.
    pub global: bool,
    pub ignore_case: bool,
}

impl UniqueConstraint {
    pub fn add(unique_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            unique_type: unique_type.into(),
            field: field.into(),
            action: ConstraintAction::Add,
            error_message: None,
            global: false,
            ignore_case: false,
        }
    }

    pub fn remove(unique_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            action: ConstraintAction::Remove,
            ..Self::add(unique_type, field)
        }
    }

    pub fn remove_instance() -> Self {
        Self {
            action: ConstraintAction::RemoveInstance,
            ..Self::add("", "")
        }
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Instance id the constraint is stored under when written by `instance`.
    pub fn stored_instance<'a>(&self, instance: &'a str) -> &'a str {
        if self.global { GLOBAL_INSTANCE } else { instance }
    }

    pub fn stored_field(&self) -> String {
        if self.ignore_case {
            self.field.to_lowercase()
        } else {
            self.field.clone()
        }
    }

    pub fn violation_message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("{} '{}' already exists", self.unique_type, self.field))
    }
}

/// One row of the constraint index.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ConstraintRecord {
    pub instance_id: String,
    pub unique_type: String,
    pub unique_field: String,
}
