use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::step::{StepDefinition, StepType};
use crate::{CoreError, StepExecutor};

/// Factory function to create step executors from their definition
pub type StepFactory =
    Arc<dyn Fn(&StepDefinition) -> Result<Arc<dyn StepExecutor>, CoreError> + Send + Sync>;

/// Maps step type tags to executor factories
#[derive(Default)]
pub struct StepRegistry {
    factories: RwLock<HashMap<StepType, StepFactory>>,
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a step type, replacing any previous one
    pub fn register(&self, step_type: StepType, factory: StepFactory) {
        self.factories.write().insert(step_type, factory);
    }

    /// Whether a factory is registered for the type
    pub fn contains(&self, step_type: StepType) -> bool {
        self.factories.read().contains_key(&step_type)
    }

    /// Registered step types
    pub fn registered_types(&self) -> Vec<StepType> {
        let mut types: Vec<StepType> = self.factories.read().keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Build the executor for a definition
    pub fn create(&self, definition: &StepDefinition) -> Result<Arc<dyn StepExecutor>, CoreError> {
        let factory = self
            .factories
            .read()
            .get(&definition.step_type)
            .cloned()
            .ok_or_else(|| CoreError::UnknownStepType(definition.step_type.to_string()))?;
        factory(definition)
    }
}
