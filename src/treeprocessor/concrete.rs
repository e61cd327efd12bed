//! A built tree together with its teardown hooks and usage count.

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime};

use crate::treeprocessor::disposer::Disposer;
use crate::treeprocessor::lifetime::Lifetime;
use crate::treeprocessor::node::Tree;

/// One generation of a sitemap. Retired when replaced; torn down once the
/// last request using it has finished.
pub struct ConcreteTree {
    tree: Tree,
    built_from: Option<SystemTime>,
    built_at: Instant,
    generation: u64,
    disposer: Mutex<Option<Disposer>>,
    lifetime: Lifetime,
}

impl ConcreteTree {
    pub fn new(tree: Tree, disposer: Disposer, built_from: Option<SystemTime>, generation: u64) -> Self {
        Self {
            tree,
            built_from,
            built_at: Instant::now(),
            generation,
            disposer: Mutex::new(Some(disposer)),
            lifetime: Lifetime::new(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Modification time of the source this tree was built from.
    pub fn built_from(&self) -> Option<SystemTime> {
        self.built_from
    }

    pub fn age(&self) -> std::time::Duration {
        self.built_at.elapsed()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start using the tree. `None` once it has been retired.
    pub fn enter(self: &Arc<Self>) -> Option<TreeLease> {
        self.lifetime.enter().then(|| TreeLease {
            tree: Arc::clone(self),
        })
    }

    /// Requests currently using this tree.
    pub fn in_flight(&self) -> usize {
        self.lifetime.active()
    }

    pub fn is_disposed(&self) -> bool {
        self.lifetime.is_retired()
    }

    /// Stop admitting requests; tear down now or when the last one leaves.
    pub fn retire(&self) {
        if self.lifetime.retire() {
            self.teardown();
        } else {
            tracing::debug!(uri = %self.tree.uri(), generation = self.generation, in_flight = self.in_flight(), "Tree retired, disposal deferred");
        }
    }

    fn teardown(&self) {
        let disposer = self
            .disposer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(disposer) = disposer {
            let hooks = disposer.len();
            let failed = disposer.dispose_all();
            tracing::info!(uri = %self.tree.uri(), generation = self.generation, hooks, failed, "Tree disposed");
        }
    }
}

impl std::fmt::Debug for ConcreteTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcreteTree")
            .field("uri", &self.tree.uri())
            .field("generation", &self.generation)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// A request's hold on a tree.
pub struct TreeLease {
    tree: Arc<ConcreteTree>,
}

impl TreeLease {
    pub fn concrete(&self) -> &Arc<ConcreteTree> {
        &self.tree
    }
}

impl Deref for TreeLease {
    type Target = Tree;
    fn deref(&self) -> &Tree {
        &self.tree.tree
    }
}

impl Drop for TreeLease {
    fn drop(&mut self) {
        if self.tree.lifetime.exit() {
            self.tree.teardown();
        }
    }
}
