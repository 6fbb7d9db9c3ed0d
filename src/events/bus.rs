//! Typed event bus with queued and immediate delivery
//!
//! Queued events (`emit*`) are held until [`EventBus::flush`] at the end of the
//! tick and delivered by ascending [`EventPriority`], then in enqueue order.
//! Immediate events reach current subscribers before the emitting call
//! returns; a kind must opt in through [`Event::IMMEDIATE`].
//!
//! Every subscription belongs to an [`OwnerId`], so a system being torn down
//! can drop all of its handlers with one [`EventBus::unsubscribe_all`] call.

use std::any::{Any, TypeId};
use std::fmt;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SimError};
use crate::core::types::{EntityId, Tick};
use crate::events::history::{EventHistory, HistoryEntry};

/// Delivery priority of a queued event; lower variants flush first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum EventPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

/// Compile-time contract for an event kind: the payload type is the shape
pub trait Event: Any + Clone + fmt::Debug {
    const KIND: &'static str;
    const PRIORITY: EventPriority = EventPriority::Normal;
    /// Whether `emit_immediate` is allowed for this kind
    const IMMEDIATE: bool = false;
}

/// A delivered event; handlers only ever see it by shared reference
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord<E> {
    pub kind: &'static str,
    pub source: Option<EntityId>,
    pub payload: E,
    pub priority: EventPriority,
    pub tick: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&dyn Any)>;

struct Subscription {
    id: SubscriptionId,
    owner: OwnerId,
    priority: i32,
    handler: Handler,
}

struct QueuedEvent {
    event: TypeId,
    kind: &'static str,
    source: Option<EntityId>,
    priority: EventPriority,
    seq: u64,
    record: Box<dyn Any>,
}

pub struct EventBus {
    /// Per event type, sorted by (priority, id); ids are issued in subscribe order
    subscriptions: AHashMap<TypeId, Vec<Subscription>>,
    owners: AHashMap<OwnerId, String>,
    queue: Vec<QueuedEvent>,
    history: EventHistory,
    tick: Tick,
    next_owner: u64,
    next_subscription: u64,
    next_seq: u64,
    delivered: u64,
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            subscriptions: AHashMap::new(),
            owners: AHashMap::new(),
            queue: Vec::new(),
            history: EventHistory::new(history_capacity),
            tick: 0,
            next_owner: 1,
            next_subscription: 1,
            next_seq: 0,
            delivered: 0,
        }
    }

    /// Tick stamped onto events emitted from now on
    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    // ========================================================================
    // Owners and subscriptions
    // ========================================================================

    pub fn register_owner(&mut self, label: impl Into<String>) -> OwnerId {
        let owner = OwnerId(self.next_owner);
        self.next_owner += 1;
        self.owners.insert(owner, label.into());
        owner
    }

    pub fn owner_label(&self, owner: OwnerId) -> Option<&str> {
        self.owners.get(&owner).map(String::as_str)
    }

    /// Forget an owner's label once it is torn down. Call after
    /// [`unsubscribe_all`](Self::unsubscribe_all); returns whether the owner was known.
    pub fn release_owner(&mut self, owner: OwnerId) -> bool {
        self.owners.remove(&owner).is_some()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Register a handler. Handlers for a kind run by ascending `priority`,
    /// then in subscription order.
    pub fn subscribe<E: Event>(
        &mut self,
        owner: OwnerId,
        priority: i32,
        mut handler: impl FnMut(&EventRecord<E>) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let handler: Handler = Box::new(move |record: &dyn Any| {
            if let Some(record) = record.downcast_ref::<EventRecord<E>>() {
                handler(record);
            }
        });
        let bucket = self.subscriptions.entry(TypeId::of::<E>()).or_default();
        let at = bucket.partition_point(|s| (s.priority, s.id) <= (priority, id));
        bucket.insert(
            at,
            Subscription {
                id,
                owner,
                priority,
                handler,
            },
        );
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.remove_where(|s| s.id == id) > 0
    }

    /// Remove `id` only if it belongs to `owner`
    pub fn unsubscribe_owned(&mut self, owner: OwnerId, id: SubscriptionId) -> bool {
        self.remove_where(|s| s.id == id && s.owner == owner) > 0
    }

    /// Remove every subscription held by `owner`; returns how many were removed.
    /// A second call for the same owner removes nothing.
    pub fn unsubscribe_all(&mut self, owner: OwnerId) -> usize {
        let removed = self.remove_where(|s| s.owner == owner);
        if removed > 0 {
            tracing::debug!(
                owner = self.owner_label(owner).unwrap_or("?"),
                removed,
                "Released event subscriptions"
            );
        }
        removed
    }

    fn remove_where(&mut self, mut matches: impl FnMut(&Subscription) -> bool) -> usize {
        let mut removed = 0;
        self.subscriptions.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|s| !matches(s));
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }

    pub fn subscriptions_of(&self, owner: OwnerId) -> usize {
        self.subscriptions
            .values()
            .flatten()
            .filter(|s| s.owner == owner)
            .count()
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriptions
            .get(&TypeId::of::<E>())
            .map_or(false, |bucket| !bucket.is_empty())
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Queue an event for delivery at the end of the tick
    pub fn emit<E: Event>(&mut self, payload: E) {
        self.enqueue(None, E::PRIORITY, payload);
    }

    pub fn emit_from<E: Event>(&mut self, source: EntityId, payload: E) {
        self.enqueue(Some(source), E::PRIORITY, payload);
    }

    /// Queue with an explicit priority instead of the kind's default
    pub fn emit_with_priority<E: Event>(
        &mut self,
        source: Option<EntityId>,
        priority: EventPriority,
        payload: E,
    ) {
        self.enqueue(source, priority, payload);
    }

    fn enqueue<E: Event>(&mut self, source: Option<EntityId>, priority: EventPriority, payload: E) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let record = EventRecord {
            kind: E::KIND,
            source,
            payload,
            priority,
            tick: self.tick,
        };
        self.queue.push(QueuedEvent {
            event: TypeId::of::<E>(),
            kind: E::KIND,
            source,
            priority,
            seq,
            record: Box::new(record),
        });
    }

    /// Deliver to current subscribers before returning; returns the number of
    /// handlers invoked. Fails for kinds that have not opted in.
    pub fn emit_immediate<E: Event>(&mut self, payload: E) -> Result<usize> {
        self.immediate(None, payload)
    }

    pub fn emit_immediate_from<E: Event>(&mut self, source: EntityId, payload: E) -> Result<usize> {
        self.immediate(Some(source), payload)
    }

    fn immediate<E: Event>(&mut self, source: Option<EntityId>, payload: E) -> Result<usize> {
        if !E::IMMEDIATE {
            return Err(SimError::ImmediateNotAllowed(E::KIND));
        }
        let record = EventRecord {
            kind: E::KIND,
            source,
            payload,
            priority: E::PRIORITY,
            tick: self.tick,
        };
        Ok(self.dispatch(TypeId::of::<E>(), E::KIND, source, &record))
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Deliver every queued event and return how many events were delivered.
    /// Events emitted by handlers during the flush wait for the next one.
    pub fn flush(&mut self) -> usize {
        if self.queue.is_empty() {
            return 0;
        }
        let mut queue = std::mem::take(&mut self.queue);
        queue.sort_by_key(|e| (e.priority, e.seq));

        let count = queue.len();
        for event in queue {
            self.dispatch(event.event, event.kind, event.source, event.record.as_ref());
        }
        tracing::debug!(tick = self.tick, events = count, "Flushed event queue");
        count
    }

    fn dispatch(&mut self, event: TypeId, kind: &'static str, source: Option<EntityId>, record: &dyn Any) -> usize {
        let mut handled = 0;
        if let Some(bucket) = self.subscriptions.get_mut(&event) {
            for subscription in bucket.iter_mut() {
                (subscription.handler)(record);
                handled += 1;
            }
        }
        self.delivered += 1;
        self.history.push(HistoryEntry {
            kind,
            source,
            tick: self.tick,
            handlers: handled,
        });
        handled
    }

    /// Queued events not yet flushed
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drop queued events without delivering them
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Total events delivered since creation
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .field("owners", &self.owners.len())
            .field("pending", &self.queue.len())
            .field("tick", &self.tick)
            .finish()
    }
}
