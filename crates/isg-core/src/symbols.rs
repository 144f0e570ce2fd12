//! # Symbol Table
//!
//! Global late binding of relationship targets that were not resolved inside
//! their own file.
//!
//! Definitions are tracked by qualified name and by simple name. A symbol
//! binds to the lowest-id entity with that exact qualified name, otherwise to
//! the single entity with that simple name. Anything else (no candidate or an
//! ambiguous simple name) resolves to nothing and the graph store substitutes
//! an external stub.

use crate::types::{Entity, EntityId, StrId};
use std::collections::{BTreeMap, BTreeSet};

/// Current binding of one referenced symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    /// Entity the symbol currently points at (`None` until first relink).
    pub target: Option<EntityId>,
    /// Entities whose declared edges reference the symbol.
    pub users: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    qualified: BTreeMap<StrId, BTreeSet<EntityId>>,
    simple: BTreeMap<StrId, BTreeSet<EntityId>>,
    bindings: BTreeMap<StrId, Binding>,
}

impl SymbolTable {
    /// Register an entity as a binding candidate.
    pub fn define(&mut self, entity: &Entity) {
        self.qualified
            .entry(entity.qualified_name)
            .or_default()
            .insert(entity.id);
        self.simple.entry(entity.name).or_default().insert(entity.id);
    }

    pub fn undefine(&mut self, entity: &Entity) {
        remove_from(&mut self.qualified, entity.qualified_name, entity.id);
        remove_from(&mut self.simple, entity.name, entity.id);
    }

    pub fn add_user(&mut self, symbol: StrId, user: EntityId) {
        self.bindings.entry(symbol).or_default().users.insert(user);
    }

    /// Drop a user; returns the binding when it has no users left.
    pub fn remove_user(&mut self, symbol: StrId, user: EntityId) -> Option<Binding> {
        let binding = self.bindings.get_mut(&symbol)?;
        binding.users.remove(&user);
        if binding.users.is_empty() {
            self.bindings.remove(&symbol)
        } else {
            None
        }
    }

    #[must_use]
    pub fn binding(&self, symbol: StrId) -> Option<&Binding> {
        self.bindings.get(&symbol)
    }

    #[must_use]
    pub fn target(&self, symbol: StrId) -> Option<EntityId> {
        self.bindings.get(&symbol).and_then(|b| b.target)
    }

    pub fn set_target(&mut self, symbol: StrId, target: EntityId) {
        if let Some(binding) = self.bindings.get_mut(&symbol) {
            binding.target = Some(target);
        }
    }

    /// Best definition for the symbol text, if any.
    #[must_use]
    pub fn resolve(&self, symbol: StrId) -> Option<EntityId> {
        if let Some(id) = self.qualified.get(&symbol).and_then(|ids| ids.first()) {
            return Some(*id);
        }
        match self.simple.get(&symbol) {
            Some(ids) if ids.len() == 1 => ids.first().copied(),
            _ => None,
        }
    }

    /// Iterate all bindings in symbol order.
    pub fn bindings(&self) -> impl Iterator<Item = (StrId, &Binding)> {
        self.bindings.iter().map(|(s, b)| (*s, b))
    }
}

fn remove_from(map: &mut BTreeMap<StrId, BTreeSet<EntityId>>, key: StrId, id: EntityId) {
    if let Some(ids) = map.get_mut(&key) {
        ids.remove(&id);
        if ids.is_empty() {
            map.remove(&key);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
