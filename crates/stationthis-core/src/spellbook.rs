//! SpellBook - registry of multi-step definitions
//!
//! Definitions are looked up by id on every resume, not held on a run in
//! memory, so any coordinator instance can pick up a run from its persisted
//! records.

use crate::error::{Error, Result};
use crate::model::SpellDefinition;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Registry of spell and cook definitions known to the coordinator
#[derive(Debug, Default)]
pub struct SpellBook {
    spells: RwLock<HashMap<String, SpellDefinition>>,
}

impl SpellBook {
    /// Create an empty spellbook
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any existing one with the same id
    pub async fn register(&self, definition: SpellDefinition) {
        let mut spells = self.spells.write().await;
        spells.insert(definition.id.clone(), definition);
    }

    /// Look up a definition by id
    pub async fn get(&self, id: &str) -> Option<SpellDefinition> {
        let spells = self.spells.read().await;
        spells.get(id).cloned()
    }

    /// Look up a definition, failing with `UnknownDefinition` if absent
    pub async fn require(&self, id: &str) -> Result<SpellDefinition> {
        self.get(id)
            .await
            .ok_or_else(|| Error::UnknownDefinition(id.to_string()))
    }

    /// Registered definition ids
    pub async fn definition_ids(&self) -> Vec<String> {
        let spells = self.spells.read().await;
        spells.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunKind, StepDefinition};

    #[tokio::test]
    async fn test_register_and_require() {
        let book = SpellBook::new();
        book.register(
            SpellDefinition::new("spell-1", "Portrait pipeline", RunKind::Cast)
                .with_step(StepDefinition::new("txt2img")),
        )
        .await;

        let spell = book.require("spell-1").await.unwrap();
        assert_eq!(spell.len(), 1);

        let err = book.require("missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownDefinition(id) if id == "missing"));
    }
}
