//! Message bus: the only coordination primitive between contexts.
//!
//! One bus per execution context. It owns three things:
//!
//! | Part | Purpose |
//! |------|---------|
//! | handler table | local subscribers keyed by [`Topic`] |
//! | history ring | the last N sent messages, oldest evicted first |
//! | transports | remote delivery to background/popup and to the active page |
//!
//! Delivery is fire-and-forget. [`MessageBus::send`] hands the message to
//! the matching transports concurrently, logs any failure, and then always
//! delivers it to local subscribers.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, error, trace};

use crate::config::DEFAULT_HISTORY_CAPACITY;
use crate::context::{ContextKind, ContextSet};
use crate::error::TransportError;
use crate::protocol::{Message, MessageKind, Payload, Topic};

/// Future returned by [`Transport::deliver`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + 'a>>;

/// Remote delivery to other contexts.
///
/// Implementations never see the local context's handlers; the bus
/// dispatches locally itself once delivery settles.
pub trait Transport {
    fn deliver<'a>(&'a self, message: &'a Message) -> TransportFuture<'a>;
}

/// Local subscriber. An `Err` is logged and does not affect other handlers.
pub type Handler = Rc<dyn Fn(&Message) -> anyhow::Result<()>>;

#[derive(Default)]
struct HandlerTable {
    topics: HashMap<Topic, Vec<(u64, Handler)>>,
    next_id: u64,
}

impl HandlerTable {
    fn insert(&mut self, topic: Topic, handler: Handler) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.topics.entry(topic).or_default().push((id, handler));
        id
    }

    fn remove(&mut self, topic: Topic, id: u64) {
        if let Some(handlers) = self.topics.get_mut(&topic) {
            handlers.retain(|(h, _)| *h != id);
            if handlers.is_empty() {
                self.topics.remove(&topic);
            }
        }
    }

    /// Kind-specific handlers first, then wildcard handlers.
    fn snapshot(&self, kind: MessageKind) -> Vec<(Topic, Handler)> {
        [Topic::Kind(kind), Topic::All]
            .into_iter()
            .flat_map(|topic| {
                self.topics
                    .get(&topic)
                    .into_iter()
                    .flatten()
                    .map(move |(_, h)| (topic, h.clone()))
            })
            .collect()
    }
}

/// Registration guard returned by [`MessageBus::subscribe`].
///
/// The handler stays registered until [`Subscription::unsubscribe`] is
/// called or the guard is dropped.
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct Subscription {
    table: Weak<RefCell<HandlerTable>>,
    topic: Topic,
    id: u64,
    active: Cell<bool>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the handler. Calling this twice is harmless.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.borrow_mut().remove(self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Per-context pub/sub registry plus transport fan-out.
pub struct MessageBus {
    identity: ContextKind,
    handlers: Rc<RefCell<HandlerTable>>,
    history: RefCell<VecDeque<Message>>,
    history_capacity: usize,
    runtime: Option<Rc<dyn Transport>>,
    tab: Option<Rc<dyn Transport>>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("identity", &self.identity)
            .field("history", &self.history.borrow().len())
            .field("runtime", &self.runtime.is_some())
            .field("tab", &self.tab.is_some())
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    /// A bus with no transports; every send is delivered locally only.
    pub fn new(identity: ContextKind) -> Self {
        Self {
            identity,
            handlers: Rc::new(RefCell::new(HandlerTable::default())),
            history: RefCell::new(VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY)),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            runtime: None,
            tab: None,
        }
    }

    /// Bound the history ring. Zero is treated as one.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Transport used when a target includes background or popup.
    #[must_use]
    pub fn with_runtime_transport(mut self, transport: Rc<dyn Transport>) -> Self {
        self.runtime = Some(transport);
        self
    }

    /// Transport used when a target includes content.
    #[must_use]
    pub fn with_tab_transport(mut self, transport: Rc<dyn Transport>) -> Self {
        self.tab = Some(transport);
        self
    }

    pub fn identity(&self) -> ContextKind {
        self.identity
    }

    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        handler: impl Fn(&Message) -> anyhow::Result<()> + 'static,
    ) -> Subscription {
        let topic = topic.into();
        let id = self.handlers.borrow_mut().insert(topic, Rc::new(handler));
        Subscription {
            table: Rc::downgrade(&self.handlers),
            topic,
            id,
            active: Cell::new(true),
        }
    }

    /// Number of topics with at least one handler.
    pub fn topic_count(&self) -> usize {
        self.handlers.borrow().topics.len()
    }

    /// Stamp, record, deliver remotely, then deliver locally.
    ///
    /// Transport failures are logged and never returned.
    pub async fn send(&self, payload: Payload, target: ContextSet) {
        let message = Message {
            payload,
            timestamp: now_millis(),
            source: ContextSet::only(self.identity),
            target,
        };
        self.record(&message);

        let wants_runtime = target.background || target.popup;
        let runtime = deliver_via(self.runtime.as_deref(), wants_runtime, &message, "runtime");
        let tab = deliver_via(self.tab.as_deref(), target.content, &message, "tab");
        tokio::join!(runtime, tab);

        self.dispatch(&message);
    }

    pub async fn broadcast(&self, payload: Payload) {
        self.send(payload, ContextSet::ALL).await;
    }

    /// Sent messages, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.history.borrow().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.borrow_mut().clear();
    }

    /// Inbound side of a transport: validate, then deliver locally.
    ///
    /// Returns whether the value was accepted.
    pub fn receive(&self, value: &Value) -> bool {
        match Message::decode(value) {
            Some(message) => {
                self.dispatch(&message);
                true
            }
            None => false,
        }
    }

    /// Like [`MessageBus::receive`] for one JSON text line.
    pub fn receive_json(&self, line: &str) -> bool {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => self.receive(&value),
            Err(e) => {
                debug!("Dropping inbound line that is not JSON: {}", e);
                false
            }
        }
    }

    fn record(&self, message: &Message) {
        let mut history = self.history.borrow_mut();
        history.push_back(message.clone());
        while history.len() > self.history_capacity {
            history.pop_front();
        }
    }

    fn dispatch(&self, message: &Message) {
        let kind = message.kind();
        // Handlers may subscribe or unsubscribe while running
        let handlers = self.handlers.borrow().snapshot(kind);
        trace!("Dispatching {} to {} handler(s)", kind, handlers.len());

        for (topic, handler) in handlers {
            let scope = match topic {
                Topic::All => "wildcard ",
                Topic::Kind(_) => "",
            };
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Error in {}message handler for {}: {:#}", scope, kind, e),
                Err(panic) => error!(
                    "Panic in {}message handler for {}: {}",
                    scope,
                    kind,
                    panic_message(panic.as_ref())
                ),
            }
        }
    }
}

async fn deliver_via(
    transport: Option<&dyn Transport>,
    wanted: bool,
    message: &Message,
    name: &str,
) {
    let Some(transport) = transport.filter(|_| wanted) else {
        return;
    };
    if let Err(e) = transport.deliver(message).await {
        error!(
            "Failed to send {} via {} transport: {} ({})",
            message.kind(),
            name,
            e,
            e.suggestion()
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
