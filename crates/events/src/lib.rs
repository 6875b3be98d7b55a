//! Engine lifecycle events for Homeo.
//!
//! - **Event types**: one variant per engine lifecycle notification
//! - **Event bus**: non-blocking broadcast with pattern-filtered subscriptions
//! - **Journal**: bounded in-memory history of recent events
//!
//! # Example
//!
//! ```ignore
//! use homeo_events::{EngineEvent, EventBus, EventPattern};
//!
//! let bus = EventBus::new();
//! let mut healing = bus.subscribe_with_pattern(EventPattern::ByTypes(vec![
//!     "healing_successful".to_string(),
//!     "healing_failed".to_string(),
//! ]));
//!
//! bus.publish(EngineEvent::execution_started());
//! let next = healing.recv().await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod types;

pub use bus::{EventBus, EventBusBuilder, EventPattern, EventSubscription};
pub use error::{Error, Result};
pub use event::EngineEvent;
pub use types::{AgentId, EventId, TaskId};
