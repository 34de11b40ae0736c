use std::collections::HashMap;
use std::sync::Arc;

use crate::action::Action;
use crate::error::ActionError;

/// Dispatches action invocations to the registered [`Action`] implementation
/// by name. Used both by the node executor's dispatch table and by
/// dry-run/preview rendering.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<&'static str, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) -> &mut Self {
        self.actions.insert(action.name(), action);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.actions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalAction;

    #[test]
    fn register_then_get_round_trips() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(LocalAction::new("provision_infrastructure")));
        assert!(registry.get("provision_infrastructure").is_ok());
    }

    #[test]
    fn unknown_action_is_an_error() {
        let registry = ActionRegistry::new();
        assert!(matches!(
            registry.get("nonexistent"),
            Err(ActionError::UnknownAction(_))
        ));
    }
}
