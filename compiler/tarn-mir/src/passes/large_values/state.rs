use crate::body::{InstId, ValueId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use tarn_diagnostics::ice;

/// An insertion-ordered set that hands items back last-in first-out.
#[derive(Debug, Clone)]
pub struct WorkList<T> {
    items: Vec<T>,
    members: HashSet<T>,
}

impl<T> Default for WorkList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            members: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> WorkList<T> {
    /// Push an item unless it is already queued.
    pub fn push(&mut self, item: T) -> bool {
        if !self.members.insert(item) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop()?;
        self.members.remove(&item);
        Some(item)
    }

    pub fn contains(&self, item: T) -> bool {
        self.members.contains(&item)
    }

    pub fn remove(&mut self, item: T) -> bool {
        if !self.members.remove(&item) {
            return false;
        }
        self.items.retain(|i| *i != item);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Remove every item, in insertion order.
    pub fn take(&mut self) -> Vec<T> {
        self.members.clear();
        std::mem::take(&mut self.items)
    }
}

/// The worklists and maps of a single function's lowering.
#[derive(Debug, Default)]
pub struct LoweringState {
    /// Values that now live in memory: entry arguments passed by address and the buffers that
    /// receive large call results.
    pub large_args: BTreeSet<ValueId>,
    /// Entry arguments whose function signature changed without moving to memory.
    pub func_sig_args: BTreeSet<ValueId>,
    /// The object reload of a value in `large_args`, for uses that need the value itself.
    pub bindings: BTreeMap<ValueId, ValueId>,
    pub buffer_to_apply: HashMap<ValueId, InstId>,
    pub apply_to_buffer: HashMap<InstId, ValueId>,

    pub applies: WorkList<InstId>,
    pub switch_enums: WorkList<InstId>,
    pub struct_extracts: WorkList<InstId>,
    pub mod_yields: WorkList<InstId>,
    pub insts_to_mod: WorkList<InstId>,
    pub tuple_insts: WorkList<InstId>,
    pub alloc_stacks: WorkList<InstId>,
    pub pointer_to_addresses: WorkList<InstId>,
    pub retains: WorkList<InstId>,
    pub releases: WorkList<InstId>,
    pub destroys: WorkList<InstId>,
    pub debug_values: WorkList<InstId>,
    pub stores: WorkList<InstId>,
    pub result_ty_insts: WorkList<InstId>,
    pub methods: WorkList<InstId>,
    pub mod_returns: WorkList<InstId>,
}

impl LoweringState {
    /// Every worklist but the call sites, which the module sweep still needs, must be empty once
    /// a function has been rewritten.
    pub fn assert_drained(&self, function: &str) {
        let lists = [
            ("switch_enum", &self.switch_enums),
            ("struct_extract", &self.struct_extracts),
            ("yield", &self.mod_yields),
            ("operand", &self.insts_to_mod),
            ("tuple", &self.tuple_insts),
            ("alloc_stack", &self.alloc_stacks),
            ("pointer_to_address", &self.pointer_to_addresses),
            ("retain_value", &self.retains),
            ("release_value", &self.releases),
            ("destroy_value", &self.destroys),
            ("debug_value", &self.debug_values),
            ("store", &self.stores),
            ("result type", &self.result_ty_insts),
            ("method", &self.methods),
            ("return", &self.mod_returns),
        ];
        for (name, list) in lists {
            if !list.is_empty() {
                ice!(
                    "{} {} rewrites left pending after lowering @{}",
                    list.len(),
                    name,
                    function
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::passes::large_values::state::WorkList;

    #[test]
    fn test_work_list_deduplicates_while_queued() {
        let mut list = WorkList::default();
        assert!(list.push(1));
        assert!(list.push(2));
        assert!(!list.push(1));
        assert_eq!(list.pop(), Some(2));
        assert_eq!(list.pop(), Some(1));
        // Once popped, an item may be queued again.
        assert!(list.push(2));
        assert!(list.remove(2));
        assert!(list.is_empty());
    }
}
