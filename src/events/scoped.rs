//! Per-system view of the event bus
//!
//! A [`ScopedEventBus`] binds one [`OwnerId`]; every subscription made through
//! it is registered under that owner, so [`ScopedEventBus::cleanup`] only ever
//! removes this system's handlers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::core::error::Result;
use crate::core::types::EntityId;
use crate::events::bus::{Event, EventBus, EventPriority, EventRecord, OwnerId, SubscriptionId};

pub struct ScopedEventBus<'a> {
    bus: &'a mut EventBus,
    owner: OwnerId,
}

impl<'a> ScopedEventBus<'a> {
    pub fn new(bus: &'a mut EventBus, owner: OwnerId) -> Self {
        Self { bus, owner }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn subscribe<E: Event>(
        &mut self,
        priority: i32,
        handler: impl FnMut(&EventRecord<E>) + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(self.owner, priority, handler)
    }

    /// Subscribe a queue the system drains during its own update
    pub fn inbox<E: Event>(&mut self, priority: i32) -> EventInbox<E> {
        let inbox = EventInbox::new();
        let sink = inbox.clone();
        self.bus.subscribe::<E>(self.owner, priority, move |record| sink.push(record.clone()));
        inbox
    }

    /// Remove one of this owner's subscriptions; ids held by other owners are left alone
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe_owned(self.owner, id)
    }

    pub fn emit<E: Event>(&mut self, payload: E) {
        self.bus.emit(payload);
    }

    pub fn emit_from<E: Event>(&mut self, source: EntityId, payload: E) {
        self.bus.emit_from(source, payload);
    }

    pub fn emit_with_priority<E: Event>(&mut self, source: Option<EntityId>, priority: EventPriority, payload: E) {
        self.bus.emit_with_priority(source, priority, payload);
    }

    pub fn emit_immediate<E: Event>(&mut self, payload: E) -> Result<usize> {
        self.bus.emit_immediate(payload)
    }

    pub fn emit_immediate_from<E: Event>(&mut self, source: EntityId, payload: E) -> Result<usize> {
        self.bus.emit_immediate_from(source, payload)
    }

    pub fn subscription_count(&self) -> usize {
        self.bus.subscriptions_of(self.owner)
    }

    /// Drop every subscription made under this owner
    pub fn cleanup(&mut self) -> usize {
        self.bus.unsubscribe_all(self.owner)
    }
}

/// Shared queue of delivered events
pub struct EventInbox<E> {
    queue: Rc<RefCell<VecDeque<EventRecord<E>>>>,
}

impl<E> EventInbox<E> {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    fn push(&self, record: EventRecord<E>) {
        self.queue.borrow_mut().push_back(record);
    }

    /// Take everything received so far, oldest first
    pub fn drain(&self) -> Vec<EventRecord<E>> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl<E> Clone for EventInbox<E> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
        }
    }
}

impl<E> Default for EventInbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventInbox<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventInbox").field("len", &self.len()).finish()
    }
}
