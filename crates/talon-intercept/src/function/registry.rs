//! Hook table: function name to the ordered chain of callbacks hooked on it.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use talon_core::types::HookId;

use super::call::InterceptedCall;

/// A hook callback. Returning `false` asks for the original call to be suppressed.
pub type HookCallback = Rc<dyn Fn(&mut InterceptedCall<'_>) -> bool>;

/// Entry in the hook table.
struct HookRegistration {
    /// Process-unique id handed back to the registrant.
    id: HookId,
    /// The callback.
    callback: HookCallback,
}

/// Registry of hook callbacks keyed by function name.
///
/// Chains keep registration order. A key whose chain becomes empty is removed,
/// so `functions()` only ever lists names with at least one hook.
#[derive(Default)]
pub(crate) struct HookTable {
    /// Function name → callbacks in registration order.
    hooks: HashMap<String, Vec<HookRegistration>>,
}

impl HookTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the chain for `function`.
    pub(crate) fn add(&mut self, function: &str, callback: HookCallback) -> HookId {
        let id = HookId::next();
        self.hooks
            .entry(function.to_string())
            .or_default()
            .push(HookRegistration { id, callback });
        id
    }

    /// Removes the hook with `id`, returning the function it was attached to.
    pub(crate) fn remove(&mut self, id: HookId) -> Option<String> {
        let function = self
            .hooks
            .iter()
            .find(|(_, chain)| chain.iter().any(|h| h.id == id))
            .map(|(function, _)| function.clone())?;

        if let Some(chain) = self.hooks.get_mut(&function) {
            chain.retain(|h| h.id != id);
            if chain.is_empty() {
                self.hooks.remove(&function);
            }
        }
        Some(function)
    }

    /// Removes the whole chain for `function`, returning how many hooks it held.
    pub(crate) fn remove_function(&mut self, function: &str) -> usize {
        self.hooks.remove(function).map_or(0, |chain| chain.len())
    }

    /// Removes every hook, returning how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let total = self.total();
        self.hooks.clear();
        total
    }

    pub(crate) fn count(&self, function: &str) -> usize {
        self.hooks.get(function).map_or(0, Vec::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    /// Hooked function names, sorted.
    pub(crate) fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Copies the chain for `function` so it can run without holding the table.
    pub(crate) fn snapshot(&self, function: &str) -> Vec<(HookId, HookCallback)> {
        self.hooks
            .get(function)
            .map(|chain| chain.iter().map(|h| (h.id, h.callback.clone())).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for name in self.functions() {
            let ids: Vec<HookId> = self.hooks[&name].iter().map(|h| h.id).collect();
            map.entry(&name, &ids);
        }
        map.finish()
    }
}
