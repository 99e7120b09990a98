//! Shared helpers for the generated tree methods.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Address of a node handle, used as identity key for link and clone
/// bookkeeping.
pub fn handle_addr<T: ?Sized>(handle: &Rc<T>) -> usize {
    Rc::as_ptr(handle) as *const () as usize
}

/// Old-address to new-handle map threaded through a deep clone so that
/// links into the cloned subtree can be remapped afterwards.
#[derive(Default)]
pub struct CloneMap {
    entries: HashMap<usize, Rc<dyn Any>>,
}

impl CloneMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old_addr: usize, new_handle: Rc<dyn Any>) {
        self.entries.insert(old_addr, new_handle);
    }

    /// New handle for the node that lived at `old_addr`, if it was cloned.
    pub fn mapped<T: 'static>(&self, old_addr: usize) -> Option<Rc<RefCell<T>>> {
        self.entries
            .get(&old_addr)
            .and_then(|handle| handle.clone().downcast::<RefCell<T>>().ok())
    }
}

/// Returned by the generated `check_complete` when a `One` edge is unset,
/// a `Many` edge is empty, or a link does not resolve inside the tree.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("incomplete tree: {message}")]
#[diagnostic(code(treegen::tree::incomplete))]
pub struct IncompleteTree {
    pub message: String,
}

impl IncompleteTree {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_map_downcasts() {
        let mut map = CloneMap::new();
        let node = Rc::new(RefCell::new(41i64));
        map.insert(7, node.clone());
        let mapped = map.mapped::<i64>(7).unwrap();
        assert!(Rc::ptr_eq(&node, &mapped));
        assert!(map.mapped::<String>(7).is_none());
        assert!(map.mapped::<i64>(8).is_none());
    }
}
