use crate::model::Model;
use std::fmt;

/// Model operations gated by a [`Permission`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Load,
    Save,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Load => "load",
            Action::Save => "save",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Access policy consulted before every model operation and controller call.
pub trait Permission {
    fn has_model_access(&self, model: &str, instance: Option<&Model>, action: Action) -> bool;

    fn has_controller_access(&self, controller: &str, action: Option<&str>) -> bool;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Permission for AllowAll {
    fn has_model_access(&self, _model: &str, _instance: Option<&Model>, _action: Action) -> bool {
        true
    }

    fn has_controller_access(&self, _controller: &str, _action: Option<&str>) -> bool {
        true
    }
}
