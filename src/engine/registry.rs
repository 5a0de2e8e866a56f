/*!
 Validator Registry

 Central authoritative mapping from validator name to handler. Seeded with
 the built-ins in a fixed order — `condition`, `data`, `query`, `multi` —
 and extensible at load time. Registration order is significant: the
 matcher evaluates a variant's processors in exactly this order, and the
 compiler materializes a processor per registered validator for every
 variant it compiles.
*/

use std::sync::Arc;

use crate::errors::{CompileError, CompileResult};

use super::validators::{
    ConditionValidator, DataValidator, MultiValidator, QueryValidator, ValidatorHandler,
};

pub struct ValidatorRegistry {
    entries: Vec<(String, Arc<dyn ValidatorHandler>)>,
}

impl ValidatorRegistry {
    /// An empty registry with no validators at all
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The standard registry seeded with the four built-ins
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins: [(&str, Arc<dyn ValidatorHandler>); 4] = [
            ("condition", Arc::new(ConditionValidator)),
            ("data", Arc::new(DataValidator)),
            ("query", Arc::new(QueryValidator)),
            ("multi", Arc::new(MultiValidator)),
        ];
        for (name, handler) in builtins {
            // Seeding cannot collide, so this cannot fire.
            registry
                .register(name, handler)
                .expect("built-in validator names are unique");
        }
        registry
    }

    /// Register a handler under a new, non-empty name
    pub fn register(
        &mut self,
        name: &str,
        handler: Arc<dyn ValidatorHandler>,
    ) -> CompileResult<()> {
        if name.is_empty() {
            return Err(CompileError::InvalidValidatorName);
        }
        if self.lookup(name).is_some() {
            return Err(CompileError::DuplicateValidator {
                name: name.to_string(),
            });
        }
        self.entries.push((name.to_string(), handler));
        Ok(())
    }

    /// Find a handler by name
    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn ValidatorHandler>> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, handler)| handler)
    }

    /// Registered (name, handler) pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn ValidatorHandler>)> {
        self.entries
            .iter()
            .map(|(name, handler)| (name.as_str(), handler))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
