// src/bus.rs
//! Synchronous, ordered observer list with typed event payloads.
//!
//! Events go through a single delivery queue. Whichever thread finds the
//! queue idle drains it, so every observer sees events in the order they were
//! enqueued even with concurrent publishers. A publish issued from inside
//! `notify` is queued behind the current event instead of re-entering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Something that wants to hear about events of type `E`.
pub trait Observer<E>: Send + Sync {
    fn notify(&self, event: &E);
}

impl<E, F> Observer<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn notify(&self, event: &E) {
        self(event)
    }
}

struct Entry<E> {
    id: u64,
    active: Arc<AtomicBool>,
    observer: Arc<dyn Observer<E>>,
    /// Events with a sequence number at or below this were queued before
    /// the observer registered.
    since: u64,
}

impl<E> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            observer: Arc::clone(&self.observer),
            since: self.since,
        }
    }
}

enum Job<E> {
    Publish {
        seq: u64,
        event: E,
    },
    /// One-off delivery to a single observer (replay on subscribe).
    Replay {
        active: Arc<AtomicBool>,
        observer: Arc<dyn Observer<E>>,
        event: E,
    },
}

struct Delivery<E> {
    queue: VecDeque<Job<E>>,
    draining: bool,
    seq: u64,
}

struct BusInner<E> {
    entries: Mutex<Vec<Entry<E>>>,
    delivery: Mutex<Delivery<E>>,
    next_id: AtomicU64,
}

impl<E> BusInner<E> {
    fn lock_entries(&self) -> MutexGuard<'_, Vec<Entry<E>>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn lock_delivery(&self) -> MutexGuard<'_, Delivery<E>> {
        match self.delivery.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn remove(&self, id: u64) {
        self.lock_entries().retain(|e| e.id != id);
    }
}

/// Releases the drain flag if an observer panics mid-delivery, so the next
/// publish picks the queue back up.
struct DrainReset<'a, E>(&'a BusInner<E>);

impl<E> Drop for DrainReset<'_, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock_delivery().draining = false;
        }
    }
}

/// Observers are called in registration order, one event at a time.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E: Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                entries: Mutex::new(Vec::new()),
                delivery: Mutex::new(Delivery {
                    queue: VecDeque::new(),
                    draining: false,
                    seq: 0,
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `observer` for events queued from now on. It stays registered
    /// until the returned `Subscription` is explicitly unsubscribed.
    pub fn subscribe(&self, observer: Arc<dyn Observer<E>>) -> Subscription {
        let delivery = self.inner.lock_delivery();
        self.register(observer, delivery.seq)
    }

    /// Like `subscribe`, and queue `current` for this observer alone ahead of
    /// any later event. Delivered by the next `drain`.
    pub fn subscribe_replay(&self, observer: Arc<dyn Observer<E>>, current: E) -> Subscription {
        let mut delivery = self.inner.lock_delivery();
        let sub = self.register(Arc::clone(&observer), delivery.seq);
        delivery.queue.push_back(Job::Replay {
            active: Arc::clone(&sub.active),
            observer,
            event: current,
        });
        sub
    }

    fn register(&self, observer: Arc<dyn Observer<E>>, since: u64) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.inner.lock_entries().push(Entry {
            id,
            active: Arc::clone(&active),
            observer,
            since,
        });

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            active,
            detach: Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(id);
                }
            }),
        }
    }

    /// Queue `event` without delivering it. Pair with `drain`.
    pub fn enqueue(&self, event: E) {
        let mut delivery = self.inner.lock_delivery();
        delivery.seq += 1;
        let seq = delivery.seq;
        delivery.queue.push_back(Job::Publish { seq, event });
    }

    /// Deliver queued events in order. Returns how many observer calls this
    /// invocation made; `0` when another call is already draining, in which
    /// case that call delivers our events too.
    pub fn drain(&self) -> usize {
        {
            let mut delivery = self.inner.lock_delivery();
            if delivery.draining {
                return 0;
            }
            delivery.draining = true;
        }
        let _reset = DrainReset(&self.inner);

        let mut delivered = 0;
        loop {
            let job = {
                let mut delivery = self.inner.lock_delivery();
                match delivery.queue.pop_front() {
                    Some(job) => job,
                    None => {
                        delivery.draining = false;
                        break;
                    }
                }
            };

            match job {
                Job::Publish { seq, event } => {
                    // copied so observers may (un)subscribe from inside notify
                    let entries: Vec<Entry<E>> = self
                        .inner
                        .lock_entries()
                        .iter()
                        .filter(|e| e.since < seq)
                        .cloned()
                        .collect();
                    for entry in entries {
                        if entry.active.load(Ordering::Acquire) {
                            entry.observer.notify(&event);
                            delivered += 1;
                        }
                    }
                }
                Job::Replay {
                    active,
                    observer,
                    event,
                } => {
                    if active.load(Ordering::Acquire) {
                        observer.notify(&event);
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// `enqueue` then `drain`.
    pub fn publish(&self, event: E) -> usize {
        self.enqueue(event);
        self.drain()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `EventBus::subscribe`.
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    detach: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    /// Stop delivery. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.detach)(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
