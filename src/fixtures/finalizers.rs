//! Teardown callbacks, run last-in first-out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::kubernetes::Lifecycle;

type Callback = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

enum Action {
    Callback(Callback),
    /// Another stack, run in place; it may have been drained already
    Nested(SharedFinalizers),
}

struct Finalizer {
    label: String,
    action: Action,
}

/// Stack of teardown callbacks owned by one scope frame
#[derive(Default)]
pub struct Finalizers {
    stack: Vec<Finalizer>,
}

impl Finalizers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, callback: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.stack.push(Finalizer {
            label: label.into(),
            action: Action::Callback(Box::new(callback)),
        });
    }

    /// Run `nested` at this position when the stack unwinds
    pub fn push_nested(&mut self, label: impl Into<String>, nested: SharedFinalizers) {
        self.stack.push(Finalizer {
            label: label.into(),
            action: Action::Nested(nested),
        });
    }

    /// Register `resource.delete()`
    pub fn push_delete(&mut self, resource: Arc<dyn Lifecycle>) {
        let label = format!("delete {}", resource.describe());
        self.push(label, move || Box::pin(async move { resource.delete().await }));
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.stack.iter().map(|f| f.label.as_str()).collect()
    }

    /// Move `other`'s callbacks on top of this stack, keeping their order
    pub fn extend(&mut self, other: Finalizers) {
        self.stack.extend(other.stack);
    }

    /// Drain and run every callback, newest first
    ///
    /// Failures are logged and do not stop the remaining callbacks. Returns
    /// the number of callbacks that failed.
    pub fn run_all(&mut self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let mut failed = 0;
            while let Some(finalizer) = self.stack.pop() {
                debug!(finalizer = %finalizer.label, "Running finalizer");
                match finalizer.action {
                    Action::Callback(callback) => {
                        if let Err(e) = callback().await {
                            failed += 1;
                            warn!(finalizer = %finalizer.label, error = %e, "Finalizer failed");
                        }
                    }
                    Action::Nested(nested) => failed += nested.run_all().await,
                }
            }
            failed
        })
    }
}

impl std::fmt::Debug for Finalizers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizers")
            .field("labels", &self.labels())
            .finish()
    }
}

/// Handle to a scope frame's finalizers that fixtures and tests can push to
#[derive(Debug, Clone, Default)]
pub struct SharedFinalizers {
    inner: Arc<Mutex<Finalizers>>,
}

impl SharedFinalizers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Finalizers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push<F>(&self, label: impl Into<String>, callback: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.lock().push(label, callback);
    }

    pub fn push_delete(&self, resource: Arc<dyn Lifecycle>) {
        self.lock().push_delete(resource);
    }

    pub fn push_nested(&self, label: impl Into<String>, nested: SharedFinalizers) {
        self.lock().push_nested(label, nested);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.lock().labels().into_iter().map(String::from).collect()
    }

    /// Take everything registered so far, leaving the handle empty
    pub fn take(&self) -> Finalizers {
        std::mem::take(&mut *self.lock())
    }

    /// Run and drain; callbacks pushed while running wait for the next call
    pub async fn run_all(&self) -> usize {
        self.take().run_all().await
    }
}
