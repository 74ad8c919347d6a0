//! Typed publish/subscribe registry.
//!
//! Handlers are grouped by message kind and run in registration order. A
//! panicking handler is contained: it is logged and the remaining handlers for
//! the same event still run. Handlers are invoked outside the registry lock,
//! so they may subscribe or unsubscribe from inside a callback.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, trace};

/// An event that can be routed by its kind.
pub trait Dispatchable {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Dispatcher<E: Dispatchable> {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<E::Kind, Vec<(SubscriptionId, Handler<E>)>>>,
}

impl<E: Dispatchable> Default for Dispatcher<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Dispatchable> Dispatcher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    pub fn dispatch(&self, event: &E) -> DispatchReport {
        let kind = event.kind();
        let snapshot: Vec<Handler<E>> = self
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for handler in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.failed += 1;
                    error!(
                        kind = ?kind,
                        panic = %panic_message(payload.as_ref()),
                        "subscriber handler panicked"
                    );
                }
            }
        }
        trace!(kind = ?kind, delivered = report.delivered, failed = report.failed, "dispatched");
        report
    }

    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<E::Kind, Vec<(SubscriptionId, Handler<E>)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Msg {
        Alpha(u32),
        Beta,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum MsgKind {
        Alpha,
        Beta,
    }

    impl Dispatchable for Msg {
        type Kind = MsgKind;

        fn kind(&self) -> MsgKind {
            match self {
                Msg::Alpha(_) => MsgKind::Alpha,
                Msg::Beta => MsgKind::Beta,
            }
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Box<dyn Fn(&Msg) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_make = Arc::clone(&seen);
        let make = move |label: &'static str| {
            let seen = Arc::clone(&seen_for_make);
            Box::new(move |msg: &Msg| {
                seen.lock().unwrap().push(format!("{label}:{msg:?}"));
            }) as Box<dyn Fn(&Msg) + Send + Sync>
        };
        (seen, make)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = Dispatcher::<Msg>::new();
        let (seen, make) = recorder();
        dispatcher.subscribe(MsgKind::Alpha, make("first"));
        dispatcher.subscribe(MsgKind::Alpha, make("second"));
        dispatcher.subscribe(MsgKind::Beta, make("beta"));

        let report = dispatcher.dispatch(&Msg::Alpha(1));
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:Alpha(1)".to_string(), "second:Alpha(1)".to_string()]
        );
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let dispatcher = Dispatcher::<Msg>::new();
        let (seen, make) = recorder();
        dispatcher.subscribe(MsgKind::Beta, |_msg: &Msg| panic!("handler blew up"));
        dispatcher.subscribe(MsgKind::Beta, make("after"));

        let report = dispatcher.dispatch(&Msg::Beta);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(*seen.lock().unwrap(), vec!["after:Beta".to_string()]);

        // registry is intact for the next event
        let report = dispatcher.dispatch(&Msg::Beta);
        assert_eq!(report.delivered, 1);
        assert_eq!(dispatcher.handler_count(MsgKind::Beta), 2);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let dispatcher = Dispatcher::<Msg>::new();
        let (seen, make) = recorder();
        let first = dispatcher.subscribe(MsgKind::Alpha, make("first"));
        dispatcher.subscribe(MsgKind::Alpha, make("second"));

        assert!(dispatcher.unsubscribe(MsgKind::Alpha, first));
        assert!(!dispatcher.unsubscribe(MsgKind::Alpha, first));
        assert!(!dispatcher.unsubscribe(MsgKind::Beta, first));

        dispatcher.dispatch(&Msg::Alpha(2));
        assert_eq!(*seen.lock().unwrap(), vec!["second:Alpha(2)".to_string()]);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::<Msg>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();

        let d = Arc::clone(&dispatcher);
        let s = Arc::clone(&slot);
        let id = dispatcher.subscribe(MsgKind::Alpha, move |_msg: &Msg| {
            if let Some(id) = *s.lock().unwrap() {
                d.unsubscribe(MsgKind::Alpha, id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(dispatcher.dispatch(&Msg::Alpha(3)).delivered, 1);
        assert_eq!(dispatcher.dispatch(&Msg::Alpha(4)).delivered, 0);
    }

    #[test]
    fn clear_drops_every_handler() {
        let dispatcher = Dispatcher::<Msg>::new();
        dispatcher.subscribe(MsgKind::Alpha, |_msg: &Msg| {});
        dispatcher.subscribe(MsgKind::Beta, |_msg: &Msg| {});
        dispatcher.clear();
        assert_eq!(dispatcher.handler_count(MsgKind::Alpha), 0);
        assert_eq!(dispatcher.dispatch(&Msg::Beta), DispatchReport::default());
    }
}
