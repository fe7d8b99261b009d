//! Core module - fundamental types and collaborators

pub mod bus;
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod identity;
pub mod logging;
pub mod project;
pub mod sqlite;
pub mod store;
pub mod workflow;

pub use bus::{BusEvent, LocalBus, MessageBus, Subscribe, Subscription};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, ConfigError, SlaPolicy};
pub use entity::{Audit, Entity, Priority};
pub use error::{BusError, LifecycleError, LifecycleResult, StoreError};
pub use identity::{EntityId, EntityPrefix, IdParseError};
pub use project::{Project, ProjectError};
pub use sqlite::{SqliteRepository, SqliteStore};
pub use store::{MemorySequences, MemoryStore, Repository, Sequences, StoreResult};
pub use workflow::{Lifecycle, TransitionError};
