// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Common types shared by the path selection components.

use std::{
    future::Future,
    sync::{Arc, RwLock, Weak},
};

/// A future that resolves to a Result.
pub trait ResFut<'a, R, E>: Future<Output = Result<R, E>> + Send + 'a {}
impl<'a, R, E, T: Future<Output = Result<R, E>> + Send + 'a> ResFut<'a, R, E> for T {}

/// A list of subscribers held as weak references.
///
/// The list never keeps a subscriber alive. Dead entries are pruned whenever the list is
/// modified.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use scion_pan::types::Subscribers;
///
/// trait DownReceiver: Send + Sync {
///     fn on_down(&self, what: &str);
/// }
///
/// struct Printer;
/// impl DownReceiver for Printer {
///     fn on_down(&self, what: &str) {
///         println!("down: {what}");
///     }
/// }
///
/// let subscribers: Subscribers<dyn DownReceiver> = Subscribers::new();
/// let receiver: Arc<dyn DownReceiver> = Arc::new(Printer);
///
/// subscribers.register(receiver.clone());
/// subscribers.for_each(|r| r.on_down("1-ff00:0:110#2"));
///
/// subscribers.unregister(&receiver);
/// assert!(subscribers.is_empty());
/// ```
pub struct Subscribers<T: ?Sized + Send + Sync + 'static> {
    receivers: Arc<RwLock<Vec<Weak<T>>>>,
}

impl<T: ?Sized + Send + Sync + 'static> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            receivers: Arc::clone(&self.receivers),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Subscribers<T> {
    /// Creates a new empty set of subscribers.
    pub fn new() -> Self {
        Self {
            receivers: Arc::new(RwLock::new(vec![])),
        }
    }

    /// Register a subscriber. The subscriber is held as a weak reference
    /// and will be automatically removed when dropped.
    pub fn register(&self, subscriber: Arc<T>) {
        let weak = Arc::downgrade(&subscriber);
        let mut receivers = self.receivers.write().expect("lock poisoned");
        receivers.retain(|r| r.strong_count() > 0);
        receivers.push(weak);
    }

    /// Removes a subscriber. Subscribers are compared by address.
    pub fn unregister(&self, subscriber: &Arc<T>) {
        let target = Arc::as_ptr(subscriber) as *const ();
        let mut receivers = self.receivers.write().expect("lock poisoned");
        receivers.retain(|r| r.strong_count() > 0 && r.as_ptr() as *const () != target);
    }

    /// Execute a closure for each live subscriber.
    ///
    /// The closure runs on a snapshot of the list, so subscribers may (un)register from within
    /// it.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let live: Vec<Arc<T>> = {
            let receivers = self.receivers.read().expect("lock poisoned");
            receivers.iter().filter_map(Weak::upgrade).collect()
        };
        for receiver in live {
            f(&*receiver);
        }
    }

    /// Returns true if there are no live subscribers.
    pub fn is_empty(&self) -> bool {
        let receivers = self.receivers.read().expect("lock poisoned");
        receivers.iter().all(|r| r.strong_count() == 0)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    #[derive(Default)]
    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn dropped_subscribers_are_skipped() {
        let subscribers: Subscribers<dyn Counter> = Subscribers::new();
        let alive = Arc::new(Hits::default());
        let dropped = Arc::new(Hits::default());
        subscribers.register(alive.clone());
        subscribers.register(dropped.clone());
        drop(dropped);

        subscribers.for_each(|c| c.hit());
        assert_eq!(alive.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unregister_removes_only_the_given_subscriber() {
        let subscribers: Subscribers<dyn Counter> = Subscribers::new();
        let first: Arc<dyn Counter> = Arc::new(Hits::default());
        let second = Arc::new(Hits::default());
        subscribers.register(first.clone());
        subscribers.register(second.clone());

        subscribers.unregister(&first);
        subscribers.for_each(|c| c.hit());

        assert_eq!(second.0.load(Ordering::Relaxed), 1);
        assert!(!subscribers.is_empty());
    }
}
