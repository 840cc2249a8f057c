//! Ordered hook dispatch.
//!
//! A [`HookCaller`] owns every registered implementation of one hook and
//! keeps them in a call order that satisfies all before/after constraints,
//! falling back to registration order between unconstrained pairs. The
//! order is recomputed on every add, so a constraint set that cannot be
//! satisfied is rejected at registration time rather than surfacing as a
//! surprising call order later.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{HookResult, PluginError};
use crate::hookspec::HookDef;

/// One registered implementation of a hook.
struct HookEntry<T: ?Sized> {
    plugin: String,
    index: usize,
    before: BTreeSet<String>,
    after: BTreeSet<String>,
    hook: Arc<T>,
}

impl<T: ?Sized> Clone for HookEntry<T> {
    fn clone(&self) -> Self {
        HookEntry {
            plugin: self.plugin.clone(),
            index: self.index,
            before: self.before.clone(),
            after: self.after.clone(),
            hook: Arc::clone(&self.hook),
        }
    }
}

/// Dispatcher for a single hook.
///
/// `T` is the hook's trait object type, e.g. `dyn FindEntityHook`.
pub struct HookCaller<T: ?Sized> {
    def: HookDef,
    entries: RwLock<Vec<HookEntry<T>>>,
}

impl<T: ?Sized> HookCaller<T> {
    pub(crate) fn new(def: HookDef) -> Self {
        HookCaller {
            def,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// The hook's static definition.
    pub fn def(&self) -> HookDef {
        self.def
    }

    /// The hook's wire name.
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    /// Number of registered implementations.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no implementation is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The plugins providing implementations, in call order.
    pub fn ordered_plugins(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.plugin.clone()).collect()
    }

    /// Clones out the `(plugin, implementation)` list in call order.
    ///
    /// Dispatch works on this snapshot so no lock is held while an
    /// implementation runs.
    pub fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.plugin.clone(), Arc::clone(&e.hook)))
            .collect()
    }

    /// Installs an implementation and re-sorts the call order.
    pub(crate) fn add(
        &self,
        plugin: &str,
        index: usize,
        before: &[String],
        after: &[String],
        hook: Arc<T>,
    ) -> Result<(), PluginError> {
        let before: BTreeSet<String> = before.iter().cloned().collect();
        let after: BTreeSet<String> = after.iter().cloned().collect();

        if before.contains(plugin) || after.contains(plugin) {
            return Err(PluginError::SelfReference {
                plugin: plugin.to_string(),
                hook: self.def.name,
            });
        }
        if let Some(other) = before.intersection(&after).next() {
            return Err(PluginError::ContradictoryConstraints {
                plugin: plugin.to_string(),
                hook: self.def.name,
                other: other.clone(),
            });
        }

        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.plugin == plugin) {
            return Err(PluginError::DuplicateImplementation {
                plugin: plugin.to_string(),
                hook: self.def.name,
            });
        }

        let mut candidate: Vec<HookEntry<T>> = entries.clone();
        candidate.push(HookEntry {
            plugin: plugin.to_string(),
            index,
            before,
            after,
            hook,
        });
        *entries = sort_entries(self.def.name, candidate)?;
        trace!(hook = self.def.name, plugin, "hook implementation added");
        Ok(())
    }

    /// Drops the named plugin's implementation, if present.
    pub(crate) fn remove_plugin(&self, plugin: &str) -> bool {
        let mut entries = self.entries.write();
        let len = entries.len();
        entries.retain(|e| e.plugin != plugin);
        entries.len() != len
    }
}

impl<T: ?Sized + Send + Sync> HookCaller<T> {
    /// Calls every implementation in order, collecting non-null results.
    ///
    /// The closure receives each implementation as an owned [`Arc`] so the
    /// future it builds can keep the implementation alive across awaits.
    pub async fn call_all<R, Fut, F>(&self, mut f: F) -> HookResult<Vec<R>>
    where
        F: FnMut(Arc<T>) -> Fut,
        Fut: Future<Output = HookResult<Option<R>>>,
    {
        let mut results = Vec::new();
        for (plugin, hook) in self.snapshot() {
            trace!(hook = self.def.name, plugin = %plugin, "calling hook");
            if let Some(result) = f(hook).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Calls implementations in order until one returns a value.
    pub async fn call_first<R, Fut, F>(&self, mut f: F) -> HookResult<Option<R>>
    where
        F: FnMut(Arc<T>) -> Fut,
        Fut: Future<Output = HookResult<Option<R>>>,
    {
        for (plugin, hook) in self.snapshot() {
            trace!(hook = self.def.name, plugin = %plugin, "calling hook");
            if let Some(result) = f(hook).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Calls every implementation in order, for hooks with no result.
    pub async fn call_unit<Fut, F>(&self, mut f: F) -> HookResult<()>
    where
        F: FnMut(Arc<T>) -> Fut,
        Fut: Future<Output = HookResult<()>>,
    {
        for (plugin, hook) in self.snapshot() {
            trace!(hook = self.def.name, plugin = %plugin, "calling hook");
            f(hook).await?;
        }
        Ok(())
    }

    /// Threads an accumulator through every implementation in order.
    pub async fn fold<A, Fut, F>(&self, init: A, mut f: F) -> HookResult<A>
    where
        F: FnMut(Arc<T>, A) -> Fut,
        Fut: Future<Output = HookResult<A>>,
    {
        let mut acc = init;
        for (plugin, hook) in self.snapshot() {
            trace!(hook = self.def.name, plugin = %plugin, "calling hook");
            acc = f(hook, acc).await?;
        }
        Ok(acc)
    }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

/// Sorts implementations to satisfy every before/after constraint.
///
/// Every implementation gets a two-part sort value whose major half starts
/// as the plugin's registration index (the minor half stays the index and
/// breaks ties). Each `before` edge is first rewritten as the inverse
/// `after` on the other side; then, for at most n² rounds: sort by value,
/// stop if the order satisfies every declared constraint, otherwise raise
/// each constrained implementation's major value past its predecessors'.
/// Constraints naming unregistered plugins are inert.
fn sort_entries<T: ?Sized>(
    hook: &'static str,
    entries: Vec<HookEntry<T>>,
) -> Result<Vec<HookEntry<T>>, PluginError> {
    let n = entries.len();
    if n <= 1 {
        return Ok(entries);
    }

    // Effective predecessor sets: declared `after` plus inverted `before`.
    let mut after_sets: Vec<BTreeSet<String>> = entries.iter().map(|e| e.after.clone()).collect();
    for (i, entry) in entries.iter().enumerate() {
        for other in &entries {
            if other.before.contains(&entry.plugin) {
                after_sets[i].insert(other.plugin.clone());
            }
        }
    }

    let mut values: Vec<(u64, usize)> = entries.iter().map(|e| (e.index as u64, e.index)).collect();

    for _ in 0..n * n {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| values[i]);

        if correctly_ordered(&entries, &order) {
            return Ok(order.iter().map(|&i| entries[i].clone()).collect());
        }

        for i in 0..n {
            if after_sets[i].is_empty() {
                continue;
            }
            let max_major = (0..n)
                .filter(|&j| after_sets[i].contains(&entries[j].plugin))
                .map(|j| values[j].0)
                .max();
            if let Some(major) = max_major {
                values[i].0 = major + 1;
            }
        }
    }

    Err(PluginError::UnsatisfiableOrdering {
        hook,
        plugins: entries.iter().map(|e| e.plugin.clone()).collect(),
    })
}

/// Checks an order against the declared before/after constraints.
fn correctly_ordered<T: ?Sized>(entries: &[HookEntry<T>], order: &[usize]) -> bool {
    let positions: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, &i)| (entries[i].plugin.as_str(), pos))
        .collect();

    for (pos, &i) in order.iter().enumerate() {
        let entry = &entries[i];
        for other in &entry.after {
            if *other == entry.plugin {
                return false;
            }
            if let Some(&other_pos) = positions.get(other.as_str())
                && other_pos > pos
            {
                return false;
            }
        }
        for other in &entry.before {
            if *other == entry.plugin {
                return false;
            }
            if let Some(&other_pos) = positions.get(other.as_str())
                && other_pos < pos
            {
                return false;
            }
        }
    }
    true
}
