//! Homiq Device Simulator
//!
//! Simulated field devices behind an RS-485 bridge. The [`Simulator`] answers
//! parsed frames the way real modules would, using a [`DeviceStore`] for all
//! state and a [`FaultInjector`] to model an unreliable bus.
//!
//! ```rust
//! use homiq_protocol::parse_frame;
//! use homiq_sim::{MemoryStore, Simulator};
//!
//! let mut sim = Simulator::new(Box::new(MemoryStore::seeded()));
//! let parsed = parse_frame("<;HB;1;0;0;1;s;1;>").unwrap();
//! let dispatch = sim.handle_frame(&parsed, "127.0.0.1:40000");
//! assert_eq!(dispatch.responses[0].val, "1");
//! ```

pub mod device;
pub mod dispatcher;
pub mod error;
pub mod fault;
pub mod scenario;
pub mod sequence;
pub mod store;

pub use device::{Device, Property, PropertySelector, ValueKind};
pub use dispatcher::{Command, Dispatch, SimEvent, Simulator};
pub use error::StoreError;
pub use fault::{FaultError, FaultInjector, FaultParams, FaultRule, FaultType};
pub use scenario::{FaultOverride, PushEventSpec, Scenario, ScenarioDefinition, ValueGenerator};
pub use sequence::SequenceCounters;
pub use store::{
    DeviceStore, Direction, EventRecord, Fixture, MemoryStore, Outcome, DEFAULT_EVENT_CAPACITY,
};
