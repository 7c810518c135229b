//! The picker contract between a client and its balancing policy.

use std::fmt;

use crate::error::PickError;

/// A connection that is ready to carry calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyConn<C> {
    pub addr: String,
    pub conn: C,
}

impl<C> ReadyConn<C> {
    pub fn new(addr: impl Into<String>, conn: C) -> Self {
        Self {
            addr: addr.into(),
            conn,
        }
    }
}

/// Per-call context handed to [`Picker::pick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickInfo {
    /// Full method name, e.g. `/orders.Orders/Get`.
    pub method: String,
}

impl PickInfo {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

/// Chooses a connection for each outbound call.
pub trait Picker<C>: Send + Sync {
    fn pick(&self, info: &PickInfo) -> Result<Picked<C>, PickError>;
}

/// Builds a fresh [`Picker`] each time the ready set changes.
pub trait PickerBuilder<C>: Send + Sync {
    /// Registration name of the policy.
    fn name(&self) -> &'static str;

    fn build(&self, ready: Vec<ReadyConn<C>>) -> Box<dyn Picker<C>>;
}

/// The outcome of a successful pick.
#[derive(Debug)]
pub struct Picked<C> {
    pub conn: C,
    pub addr: String,
    pub done: Done,
}

/// Picker-side bookkeeping for one call.
pub trait Completion: Send {
    /// The call finished; `status` is `None` on success.
    fn complete(self: Box<Self>, status: Option<&tonic::Status>);

    /// The call was abandoned without an outcome.
    fn release(self: Box<Self>);
}

/// Handle reporting a call's outcome back to the picker that chose it.
///
/// Call [`Done::finish`] exactly once. Dropping the handle unfinished only
/// releases the connection's in-flight slot.
#[must_use = "dropping a done handle discards the call's latency and outcome"]
pub struct Done {
    hook: Option<Box<dyn Completion>>,
}

impl Done {
    pub fn new(hook: impl Completion + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
        }
    }

    /// Record the call's outcome. `None` means success.
    pub fn finish(mut self, status: Option<&tonic::Status>) {
        if let Some(hook) = self.hook.take() {
            hook.complete(status);
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.release();
        }
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("pending", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counts {
        completed: AtomicUsize,
        failed: AtomicUsize,
        released: AtomicUsize,
    }

    struct Hook(Arc<Counts>);

    impl Completion for Hook {
        fn complete(self: Box<Self>, status: Option<&tonic::Status>) {
            self.0.completed.fetch_add(1, Ordering::SeqCst);
            if status.is_some() {
                self.0.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn release(self: Box<Self>) {
            self.0.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn finish_completes_once() {
        let counts = Arc::new(Counts::default());
        Done::new(Hook(counts.clone())).finish(Some(&tonic::Status::internal("boom")));

        assert_eq!(counts.completed.load(Ordering::SeqCst), 1);
        assert_eq!(counts.failed.load(Ordering::SeqCst), 1);
        assert_eq!(counts.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_releases() {
        let counts = Arc::new(Counts::default());
        drop(Done::new(Hook(counts.clone())));

        assert_eq!(counts.completed.load(Ordering::SeqCst), 0);
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pick_error_maps_to_unavailable() {
        let status: tonic::Status = PickError::NoConnAvailable.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
