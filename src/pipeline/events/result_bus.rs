use crate::pipeline::types::RecognizerResult;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Receives every result published on a [`ResultBus`].
pub trait ResultListener: Send + Sync {
    fn on_result(&self, result: &RecognizerResult);
}

impl<F> ResultListener for F
where
    F: Fn(&RecognizerResult) + Send + Sync,
{
    fn on_result(&self, result: &RecognizerResult) {
        self(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(Uuid);

enum RegistryChange {
    Add(ListenerHandle, Arc<dyn ResultListener>),
    Remove(ListenerHandle),
    Clear,
}

#[derive(Default)]
struct Registry {
    listeners: Vec<(ListenerHandle, Arc<dyn ResultListener>)>,
    notifying: usize,
    deferred: Vec<RegistryChange>,
}

impl Registry {
    fn apply(&mut self, change: RegistryChange) {
        match change {
            RegistryChange::Add(handle, listener) => self.listeners.push((handle, listener)),
            RegistryChange::Remove(handle) => self.listeners.retain(|(id, _)| *id != handle),
            RegistryChange::Clear => self.listeners.clear(),
        }
    }
}

/// Fan-out of results to listeners in subscription order.
///
/// `notify` walks a snapshot of the registry. Subscriptions changed while any notify is
/// running are queued and applied once the last in-progress notify returns.
#[derive(Default)]
pub struct ResultBus {
    registry: Mutex<Registry>,
    verbose: bool,
}

impl ResultBus {
    pub fn new(verbose: bool) -> Self {
        Self {
            registry: Mutex::default(),
            verbose,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_or_defer(&self, change: RegistryChange) {
        let mut registry = self.lock();
        if registry.notifying > 0 {
            registry.deferred.push(change);
        } else {
            registry.apply(change);
        }
    }

    pub fn subscribe(&self, listener: impl ResultListener + 'static) -> ListenerHandle {
        let handle = ListenerHandle(Uuid::new_v4());
        self.apply_or_defer(RegistryChange::Add(handle, Arc::new(listener)));
        if self.verbose {
            debug!(listener = %handle.0, "Listener added");
        }
        handle
    }

    /// Registers a listener that forwards clones of every result into a channel.
    pub fn subscribe_channel(
        &self,
    ) -> (ListenerHandle, mpsc::UnboundedReceiver<RecognizerResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(move |result: &RecognizerResult| {
            // A dropped receiver just means the consumer went away.
            let _ = tx.send(result.clone());
        });
        (handle, rx)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) {
        self.apply_or_defer(RegistryChange::Remove(handle));
        if self.verbose {
            debug!(listener = %handle.0, "Listener removed");
        }
    }

    pub fn clear(&self) {
        self.apply_or_defer(RegistryChange::Clear);
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn notify(&self, result: &RecognizerResult) {
        let snapshot: Vec<Arc<dyn ResultListener>> = {
            let mut registry = self.lock();
            registry.notifying += 1;
            registry
                .listeners
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect()
        };
        let _guard = NotifyGuard(self);

        if self.verbose {
            debug!(?result, listeners = snapshot.len(), "Event notified");
        }
        for listener in &snapshot {
            listener.on_result(result);
        }
    }

    fn finish_notify(&self) {
        let mut registry = self.lock();
        registry.notifying -= 1;
        if registry.notifying == 0 {
            let deferred = std::mem::take(&mut registry.deferred);
            for change in deferred {
                registry.apply(change);
            }
        }
    }
}

struct NotifyGuard<'a>(&'a ResultBus);

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_notify();
    }
}
