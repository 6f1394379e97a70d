//! Name binding environments.
//!
//! A module's top-level bindings live in a shared, mutable map; function
//! values capture their defining module's environment so they resolve
//! globals correctly when called from another module or from the host.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::span::SourceInfo;
use crate::value::Value;

/// Shared name → value map.
pub type Bindings = Rc<RefCell<IndexMap<String, Value>>>;

/// A module's environment: its global bindings plus source metadata for
/// position reporting.
#[derive(Clone)]
pub struct ModuleEnv {
    pub bindings: Bindings,
    pub source: Rc<SourceInfo>,
}

impl ModuleEnv {
    pub fn new(source: Rc<SourceInfo>) -> Self {
        Self {
            bindings: Rc::new(RefCell::new(IndexMap::new())),
            source,
        }
    }
}

impl std::fmt::Debug for ModuleEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleEnv({})", self.source.path().display())
    }
}
