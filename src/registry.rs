use parking_lot::Mutex;
use std::sync::Arc;

/// A per-frame callback. Returning `false` drops it from the registry.
pub trait Refresh: Send + Sync {
    fn refresh(&self, now_ms: u64) -> bool;
}

impl<F> Refresh for F
where
    F: Fn(u64) -> bool + Send + Sync,
{
    fn refresh(&self, now_ms: u64) -> bool {
        self(now_ms)
    }
}

/// Ordered list of refresh callbacks driven by the render loop.
///
/// Cloning shares the list. A frame runs under the lock, so registrations
/// land either before or after a whole frame.
#[derive(Clone, Default)]
pub struct Registry {
    callbacks: Arc<Mutex<Vec<Arc<dyn Refresh>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: Arc<dyn Refresh>) {
        self.callbacks.lock().push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }

    /// Invoke every callback with `now_ms`, newest first, removing those that
    /// report they are finished. Returns how many were removed.
    pub fn drive(&self, now_ms: u64) -> usize {
        let mut callbacks = self.callbacks.lock();
        let mut removed = 0;
        for i in (0..callbacks.len()).rev() {
            if !callbacks[i].refresh(now_ms) {
                callbacks.remove(i);
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Tracked {
        calls: AtomicUsize,
        alive: AtomicBool,
    }

    impl Tracked {
        fn new(alive: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                alive: AtomicBool::new(alive),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Refresh for Tracked {
        fn refresh(&self, _now_ms: u64) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn empty_registry_drives_without_error() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.drive(0), 0);
    }

    #[test]
    fn drives_every_callback_once() {
        let registry = Registry::new();
        let tracked: Vec<_> = (0..5).map(|_| Tracked::new(true)).collect();
        for entry in &tracked {
            registry.register(entry.clone());
        }

        assert_eq!(registry.drive(100), 0);
        assert!(tracked.iter().all(|p| p.calls() == 1));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn removes_the_finished_entry_not_the_tail() {
        let registry = Registry::new();
        let first = Tracked::new(true);
        let finished = Tracked::new(false);
        let last = Tracked::new(true);
        registry.register(first.clone());
        registry.register(finished.clone());
        registry.register(last.clone());

        assert_eq!(registry.drive(0), 1);
        assert_eq!(registry.len(), 2);

        registry.drive(1);
        assert_eq!(first.calls(), 2);
        assert_eq!(finished.calls(), 1);
        assert_eq!(last.calls(), 2);
    }

    #[test]
    fn removes_several_in_one_pass() {
        let registry = Registry::new();
        let tracked: Vec<_> = [false, true, false, false, true]
            .into_iter()
            .map(Tracked::new)
            .collect();
        for entry in &tracked {
            registry.register(entry.clone());
        }

        assert_eq!(registry.drive(0), 3);
        assert_eq!(registry.len(), 2);
        assert!(tracked.iter().all(|p| p.calls() == 1));
    }

    #[test]
    fn visits_newest_first() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            registry.register(Arc::new(move |_now: u64| {
                order.lock().push(id);
                true
            }));
        }

        registry.drive(0);
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn clones_share_entries() {
        let registry = Registry::new();
        let other = registry.clone();
        other.register(Tracked::new(true));
        assert_eq!(registry.len(), 1);
    }
}
