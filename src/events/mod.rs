pub mod bus;
pub mod history;
pub mod scoped;
pub mod types;

pub use bus::{Event, EventBus, EventPriority, EventRecord, OwnerId, SubscriptionId};
pub use history::{EventHistory, HistoryEntry};
pub use scoped::{EventInbox, ScopedEventBus};
pub use types::{ComponentDetached, EntityDestroyed};
