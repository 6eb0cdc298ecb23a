//! Homiq Bridge
//!
//! The TCP side of an emulated serial-to-TCP device server. Clients connect
//! over TCP and exchange Homiq frames with simulated devices:
//!
//! - **Actor**: single owner of all simulation state ([`actor`])
//! - **Connections**: per-socket reader/writer tasks with keepalive and idle timeout
//! - **Push scheduler**: cancellable timers emitting unsolicited frames
//! - **Events**: broadcast stream of traffic, connection and device activity
//!
//! # Example
//!
//! ```rust,ignore
//! use homiq_bridge::{BridgeServer, ServerConfig};
//! use homiq_sim::{MemoryStore, Simulator};
//!
//! let simulator = Simulator::new(Box::new(MemoryStore::seeded()));
//! let handle = BridgeServer::start(ServerConfig::default(), simulator).await?;
//! let mut events = handle.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.to_json());
//! }
//! ```

pub mod actor;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod server;

pub use actor::{run_bridge_actor, ActorOptions, BridgeCommand, TcpStats, TcpStatus};
pub use config::ServerConfig;
pub use connection::{ConnectionId, ConnectionInfo};
pub use error::BridgeError;
pub use events::{BridgeEvent, EventKind};
pub use scheduler::PushScheduler;
pub use server::{BridgeHandle, BridgeServer};
