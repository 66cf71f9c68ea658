//! In-process stand-in for the host's message bus.
//!
//! Contexts never share state; they hold an `Arc<MessageBus>` and exchange
//! [`Message`]s through it. Every delivery is best-effort: sending to a
//! context that is not attached fails with [`BusError`] and is not queued.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    error::BusError,
    messages::{Message, Reply},
};

pub type PageId = u32;
pub type WindowId = u32;

const RUNTIME_CHANNEL_CAPACITY: usize = 64;

/// Items drained by the coordinator.
#[derive(Debug)]
pub enum Inbound {
    Message {
        message: Message,
        reply: Option<oneshot::Sender<Reply>>,
    },
    /// A window the coordinator may be tracking was closed by the host.
    WindowClosed(WindowId),
}

pub type CoordinatorInbox = mpsc::UnboundedReceiver<Inbound>;

/// Receiving side handed to a page surface when it registers.
pub struct PageEndpoint {
    pub id: PageId,
    pub inbox: mpsc::UnboundedReceiver<Message>,
}

#[derive(Default)]
struct PageRegistry {
    next_id: PageId,
    active: Option<PageId>,
    pages: BTreeMap<PageId, mpsc::UnboundedSender<Message>>,
}

pub struct MessageBus {
    coordinator: mpsc::UnboundedSender<Inbound>,
    worker: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pages: Mutex<PageRegistry>,
    runtime: broadcast::Sender<Message>,
}

impl MessageBus {
    pub fn new() -> (Arc<Self>, CoordinatorInbox) {
        let (coordinator, inbox) = mpsc::unbounded_channel();
        let (runtime, _) = broadcast::channel(RUNTIME_CHANNEL_CAPACITY);

        let bus = Arc::new(Self {
            coordinator,
            worker: Mutex::new(None),
            pages: Mutex::new(PageRegistry::default()),
            runtime,
        });
        (bus, inbox)
    }

    // Coordinator side

    /// Fire-and-forget message to the coordinator.
    pub fn send_command(&self, message: Message) -> Result<(), BusError> {
        self.coordinator
            .send(Inbound::Message {
                message,
                reply: None,
            })
            .map_err(|_| BusError::Closed("coordinator"))
    }

    /// Message to the coordinator that expects a [`Reply`].
    pub async fn request(&self, message: Message) -> Result<Reply, BusError> {
        let (tx, rx) = oneshot::channel();
        self.coordinator
            .send(Inbound::Message {
                message,
                reply: Some(tx),
            })
            .map_err(|_| BusError::Closed("coordinator"))?;
        rx.await.map_err(|_| BusError::NoReceiver("reply"))
    }

    pub fn notify_window_closed(&self, id: WindowId) {
        if self.coordinator.send(Inbound::WindowClosed(id)).is_err() {
            debug!("coordinator gone; dropped close notice for window {id}");
        }
    }

    // Worker side

    pub fn attach_worker(&self, tx: mpsc::UnboundedSender<Message>) {
        *lock(&self.worker) = Some(tx);
    }

    /// Drop the bus's handle on the worker inbox. Returns whether one was attached.
    pub fn detach_worker(&self) -> bool {
        lock(&self.worker).take().is_some()
    }

    pub fn send_to_worker(&self, message: Message) -> Result<(), BusError> {
        let guard = lock(&self.worker);
        let tx = guard.as_ref().ok_or(BusError::NoReceiver("worker"))?;
        tx.send(message).map_err(|_| BusError::Closed("worker"))
    }

    // Page side

    /// Register a page. The first page registered becomes the active one.
    pub fn open_page(&self) -> PageEndpoint {
        let (tx, inbox) = mpsc::unbounded_channel();
        let mut registry = lock(&self.pages);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.pages.insert(id, tx);
        if registry.active.is_none() {
            registry.active = Some(id);
        }
        PageEndpoint { id, inbox }
    }

    pub fn close_page(&self, id: PageId) {
        let mut registry = lock(&self.pages);
        registry.pages.remove(&id);
        if registry.active == Some(id) {
            registry.active = None;
        }
    }

    pub fn activate_page(&self, id: PageId) -> Result<(), BusError> {
        let mut registry = lock(&self.pages);
        if !registry.pages.contains_key(&id) {
            return Err(BusError::NoReceiver("page"));
        }
        registry.active = Some(id);
        Ok(())
    }

    pub fn active_page(&self) -> Option<PageId> {
        lock(&self.pages).active
    }

    pub fn send_to_active_page(&self, message: Message) -> Result<(), BusError> {
        let registry = lock(&self.pages);
        let id = registry.active.ok_or(BusError::NoReceiver("active page"))?;
        let tx = registry
            .pages
            .get(&id)
            .ok_or(BusError::NoReceiver("active page"))?;
        tx.send(message).map_err(|_| BusError::Closed("page"))
    }

    /// Deliver to the active page, then every other page, then the runtime
    /// broadcast. Failed deliveries are skipped. Returns the number of pages
    /// reached.
    pub fn fan_out(&self, message: &Message) -> usize {
        let mut delivered = 0;
        {
            let registry = lock(&self.pages);
            let active = registry.active;
            let ordered = active
                .into_iter()
                .chain(registry.pages.keys().copied().filter(|id| Some(*id) != active));

            for id in ordered {
                let Some(tx) = registry.pages.get(&id) else {
                    continue;
                };
                match tx.send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => debug!("page {id} detached; skipped {}", message.kind()),
                }
            }
        }

        self.broadcast(message.clone());
        delivered
    }

    // Runtime broadcast (status surfaces)

    pub fn broadcast(&self, message: Message) {
        if self.runtime.send(message).is_err() {
            debug!("no runtime listeners attached");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.runtime.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
