//! Ordered teardown of what a tree build registered.

use crate::error::BoxError;

type DisposeFn = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// Teardown hooks run in reverse registration order, so dependents go
/// before what they depend on.
#[derive(Default)]
pub struct Disposer {
    entries: Vec<(String, DisposeFn)>,
}

impl Disposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        hook: impl FnOnce() -> Result<(), BoxError> + Send + 'static,
    ) {
        self.entries.push((name.into(), Box::new(hook)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Run every hook, last registered first. Failures are logged and do
    /// not stop the remaining hooks.
    pub fn dispose_all(self) -> usize {
        let mut failed = 0;
        for (name, hook) in self.entries.into_iter().rev() {
            if let Err(e) = hook() {
                failed += 1;
                tracing::warn!(node = %name, error = %e, "Dispose failed");
            }
        }
        failed
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer").field("entries", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_reverse_order_and_failures_do_not_stop() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut disposer = Disposer::new();
        for name in ["x", "y", "z"] {
            let order = order.clone();
            disposer.register(name, move || {
                order.lock().unwrap().push(name);
                if name == "y" {
                    return Err("y refused".into());
                }
                Ok(())
            });
        }
        assert_eq!(disposer.names(), vec!["x", "y", "z"]);
        assert_eq!(disposer.dispose_all(), 1);
        assert_eq!(*order.lock().unwrap(), vec!["z", "y", "x"]);
    }
}
