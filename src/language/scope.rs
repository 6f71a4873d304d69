use crate::language::interner::StringId;
use std::collections::HashMap;

/// Stack of name-to-value mappings implementing lexical scoping. The same
/// structure backs variable types during checking, storage cells during
/// codegen, and the function symbol table.
pub struct ScopeChain<Value> {
    scopes: Vec<HashMap<StringId, Value>>,
}

impl<Value> Default for ScopeChain<Value> {
    fn default() -> Self {
        Self { scopes: Vec::new() }
    }
}

impl<Value> ScopeChain<Value> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pushes and pops must be strictly balanced; popping an empty chain is a
    /// programmer error.
    pub fn pop_scope(&mut self) {
        assert!(
            self.scopes.pop().is_some(),
            "pop_scope on an empty scope chain"
        );
    }

    /// Runs `action` inside a freshly pushed scope, popping it on the way out.
    pub fn with_scope<R>(&mut self, action: impl FnOnce(&mut Self) -> R) -> R {
        self.push_scope();
        let result = action(self);
        self.pop_scope();
        result
    }

    /// Inserts into the innermost scope. Re-declaring a name in the same
    /// scope replaces the binding; declaring in a nested scope shadows the
    /// outer one.
    pub fn define(&mut self, name: StringId, value: Value) {
        let scope = self
            .scopes
            .last_mut()
            .expect("define called with no active scope");
        scope.insert(name, value);
    }

    /// Searches innermost to outermost and returns the first hit.
    pub fn lookup(&self, name: StringId) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name))
    }

    /// Updates an existing binding in place, innermost first. Returns false
    /// without mutating anything when no scope binds `name`; whether that
    /// should auto-define or be an error is the caller's decision.
    pub fn assign(&mut self, name: StringId, value: Value) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(&name) {
                *slot = value;
                return true;
            }
        }
        false
    }

    /// True when the innermost scope itself binds `name`.
    pub fn defined_innermost(&self, name: StringId) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.contains_key(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::interner::StringInterner;
    use pretty_assertions::assert_eq;

    fn ids() -> (StringInterner, StringId, StringId) {
        let mut interner = StringInterner::new();
        let x = interner.intern("x");
        let y = interner.intern("y");
        (interner, x, y)
    }

    #[test]
    fn lookup_scans_innermost_to_outermost() {
        let (_interner, x, y) = ids();
        let mut chain = ScopeChain::new();
        chain.push_scope();
        chain.define(x, 1);
        chain.define(y, 2);
        chain.push_scope();
        chain.define(x, 10);
        assert_eq!(chain.lookup(x), Some(&10));
        assert_eq!(chain.lookup(y), Some(&2));
    }

    #[test]
    fn popping_restores_shadowed_bindings() {
        let (_interner, x, _y) = ids();
        let mut chain = ScopeChain::new();
        chain.push_scope();
        chain.define(x, 1);
        chain.with_scope(|inner| {
            inner.define(x, 99);
            assert_eq!(inner.lookup(x), Some(&99));
        });
        assert_eq!(chain.lookup(x), Some(&1));
    }

    #[test]
    fn popping_restores_absence() {
        let (_interner, x, _y) = ids();
        let mut chain: ScopeChain<i32> = ScopeChain::new();
        chain.push_scope();
        chain.with_scope(|inner| {
            inner.define(x, 5);
        });
        assert_eq!(chain.lookup(x), None);
    }

    #[test]
    fn assign_updates_in_place_or_reports_missing() {
        let (_interner, x, y) = ids();
        let mut chain = ScopeChain::new();
        chain.push_scope();
        chain.define(x, 1);
        chain.push_scope();
        assert!(chain.assign(x, 7));
        assert!(!chain.assign(y, 3));
        chain.pop_scope();
        assert_eq!(chain.lookup(x), Some(&7));
        assert_eq!(chain.lookup(y), None);
    }

    #[test]
    #[should_panic(expected = "pop_scope on an empty scope chain")]
    fn unbalanced_pop_panics() {
        let mut chain: ScopeChain<i32> = ScopeChain::new();
        chain.pop_scope();
    }
}
