//! Bridge Actor
//!
//! All simulation state (device store, fault randomness, sequence counters,
//! the connection registry and counters) is owned by one task. Connection
//! tasks, push timers and admin callers talk to it through [`BridgeCommand`]s,
//! so every frame and every admin change is applied atomically and frames
//! from one connection are handled strictly in arrival order.
//!
//! # Example
//!
//! ```rust,ignore
//! use homiq_bridge::actor::{run_bridge_actor, ActorOptions, BridgeCommand};
//! use homiq_sim::{MemoryStore, Simulator};
//! use tokio::sync::{broadcast, mpsc};
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(256);
//! let (event_tx, _) = broadcast::channel(1024);
//! let simulator = Simulator::new(Box::new(MemoryStore::seeded()));
//!
//! tokio::spawn(run_bridge_actor(
//!     cmd_rx,
//!     cmd_tx.downgrade(),
//!     event_tx,
//!     simulator,
//!     ActorOptions::default(),
//! ));
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use homiq_protocol::{try_parse_frame, Frame};
use homiq_sim::{Device, EventRecord, Outcome, Scenario, SimEvent, Simulator};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionId, ConnectionInfo, ConnectionTaskCommand, Outbound};
use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventKind};
use crate::scheduler::PushScheduler;

/// Reply channel for admin commands
pub type Reply<T> = oneshot::Sender<Result<T, BridgeError>>;

/// Commands sent to the bridge actor
#[derive(Debug)]
pub enum BridgeCommand {
    /// Register a newly accepted connection
    RegisterConnection {
        /// Peer address
        remote_addr: String,
        /// Queue drained by the connection's writer task
        writer_tx: mpsc::Sender<Outbound>,
        /// Control channel of the connection's reader task
        control_tx: mpsc::Sender<ConnectionTaskCommand>,
        /// Channel to send back the assigned id
        response: oneshot::Sender<ConnectionId>,
    },

    /// Inbound data on a connection, already de-framed
    Inbound {
        /// Source connection
        id: ConnectionId,
        /// Complete candidate frame lines, in arrival order
        lines: Vec<String>,
        /// Non-frame lines discarded while de-framing
        noise: u64,
        /// Responses for the connection's writer, in order
        response: oneshot::Sender<Vec<Outbound>>,
    },

    /// A connection's reader has stopped
    UnregisterConnection {
        /// Connection id
        id: ConnectionId,
        /// Why it stopped
        reason: &'static str,
    },

    /// A push timer fired
    PushTick {
        /// Timer set the tick belongs to
        generation: u64,
        /// Index of the push event in the scenario
        index: usize,
    },

    /// Write a frame to every open connection
    Broadcast {
        /// Frame to send
        frame: Frame,
    },

    /// Make a scenario exclusively active and restart push timers
    ActivateScenario {
        /// Scenario name
        name: String,
        /// The activated scenario
        response: Reply<Scenario>,
    },

    /// Set a device property by command or key
    SetProperty {
        /// Device address
        address: String,
        /// Read/write command or property key
        property: String,
        /// New value
        value: String,
        /// Completion
        response: Reply<()>,
    },

    /// Set a device's programming-mode flag
    SetProgrammingMode {
        /// Device address
        address: String,
        /// New flag
        enabled: bool,
        /// Completion
        response: Reply<()>,
    },

    /// Set a device's online flag
    SetOnline {
        /// Device address
        address: String,
        /// New flag
        online: bool,
        /// Completion
        response: Reply<()>,
    },

    /// List all devices
    ListDevices {
        /// Devices ordered by address
        response: Reply<Vec<Device>>,
    },

    /// Read the most recent event log records
    RecentEvents {
        /// Maximum number of records
        limit: usize,
        /// Records, oldest first
        response: Reply<Vec<EventRecord>>,
    },

    /// Snapshot of the server state
    QueryStatus {
        /// Status snapshot
        response: oneshot::Sender<TcpStatus>,
    },

    /// Close every connection, stop push timers and exit
    Shutdown,
}

/// Static settings for the actor
#[derive(Debug, Clone)]
pub struct ActorOptions {
    /// Port reported in the status
    pub port: u16,
    /// Advisory connection limit
    pub max_clients: usize,
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self {
            port: 4001,
            max_clients: 10,
        }
    }
}

/// Server-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpStats {
    /// Candidate frame lines received
    pub total_rx: u64,
    /// Frames written
    pub total_tx: u64,
    /// Unparsable and noise lines
    pub errors: u64,
    /// Seconds since the actor started
    pub uptime: u64,
}

/// Status snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpStatus {
    /// Whether the listener is accepting
    pub listening: bool,
    /// Listen port
    pub port: u16,
    /// Open connections ordered by id
    pub connections: Vec<ConnectionInfo>,
    /// Counters
    pub stats: TcpStats,
}

struct ConnectionEntry {
    info: ConnectionInfo,
    writer_tx: mpsc::Sender<Outbound>,
    control_tx: mpsc::Sender<ConnectionTaskCommand>,
}

/// Internal state for the bridge actor
struct BridgeActorState {
    simulator: Simulator,
    options: ActorOptions,
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
    next_id: u64,
    scheduler: PushScheduler,
    stats: TcpStats,
    started_at: Instant,
    listening: bool,
    event_tx: broadcast::Sender<BridgeEvent>,
    self_tx: mpsc::WeakSender<BridgeCommand>,
}

impl BridgeActorState {
    fn emit(&self, kind: EventKind) {
        // No subscribers is fine
        let _ = self.event_tx.send(BridgeEvent::now(kind));
    }

    fn flush_sim_events(&mut self) {
        for event in self.simulator.drain_events() {
            match event {
                SimEvent::DeviceUpdate {
                    device_addr,
                    cmd,
                    value,
                } => self.emit(EventKind::DeviceUpdate {
                    device_addr,
                    cmd,
                    value,
                }),
            }
        }
    }

    fn register(
        &mut self,
        remote_addr: String,
        writer_tx: mpsc::Sender<Outbound>,
        control_tx: mpsc::Sender<ConnectionTaskCommand>,
    ) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);

        if self.connections.len() >= self.options.max_clients {
            warn!(
                "{} clients connected, above the configured maximum of {}; accepting anyway",
                self.connections.len() + 1,
                self.options.max_clients
            );
        }

        self.connections.insert(
            id,
            ConnectionEntry {
                info: ConnectionInfo::new(id, remote_addr.clone()),
                writer_tx,
                control_tx,
            },
        );
        info!(
            "New connection {} from {} ({} total)",
            id,
            remote_addr,
            self.connections.len()
        );
        self.emit(EventKind::Connection { id, remote_addr });
        id
    }

    fn unregister(&mut self, id: ConnectionId, reason: &str) {
        if let Some(entry) = self.connections.remove(&id) {
            info!(
                "Connection {} ({}) closed: {} ({} remaining)",
                id,
                entry.info.remote_addr,
                reason,
                self.connections.len()
            );
            self.emit(EventKind::Disconnection {
                id,
                remote_addr: entry.info.remote_addr,
            });
        }
    }

    /// Dispatch inbound lines; returns the responses for the connection
    fn handle_inbound(&mut self, id: ConnectionId, lines: Vec<String>, noise: u64) -> Vec<Outbound> {
        self.stats.errors += noise;

        let Some(entry) = self.connections.get_mut(&id) else {
            debug!("Data for unknown connection {}", id);
            return Vec::new();
        };
        entry.info.last_activity_at = chrono::Utc::now();
        let remote_addr = entry.info.remote_addr.clone();
        let mut outbound = Vec::new();

        for line in lines {
            if let Some(entry) = self.connections.get_mut(&id) {
                entry.info.rx_count += 1;
            }
            self.stats.total_rx += 1;
            debug!("RX {}: {}", remote_addr, line);

            let parsed = match try_parse_frame(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!("Discarding line from {} ({}): {}", remote_addr, e, line);
                    self.stats.errors += 1;
                    continue;
                }
            };

            self.emit(EventKind::FrameRx {
                connection: id,
                remote_addr: remote_addr.clone(),
                frame: parsed.raw.clone(),
                parsed: parsed.frame.clone(),
                valid: parsed.valid,
            });

            let dispatch = self.simulator.handle_frame(&parsed, &remote_addr);
            for response in &dispatch.responses {
                let wire = response.serialize(true);
                self.record_tx(id, &wire, dispatch.delay, false);
                outbound.push(Outbound::delayed(wire.into_bytes(), dispatch.delay));
            }
            self.flush_sim_events();
        }

        outbound
    }

    /// Count a frame as sent and announce it
    fn record_tx(
        &mut self,
        id: ConnectionId,
        wire: &str,
        delay: Option<std::time::Duration>,
        push: bool,
    ) {
        let Some(entry) = self.connections.get_mut(&id) else {
            return;
        };
        entry.info.tx_count += 1;
        self.stats.total_tx += 1;
        let remote_addr = entry.info.remote_addr.clone();
        debug!("TX {}: {}", remote_addr, wire.trim_end());
        self.emit(EventKind::FrameTx {
            connection: id,
            remote_addr,
            frame: wire.trim_end().to_string(),
            push,
            delay_ms: delay.map(|d| d.as_millis() as u64),
        });
    }

    /// Queue an unsolicited frame for one connection; never waits on a slow
    /// writer
    fn send_to(&mut self, id: ConnectionId, frame: &Frame, push: bool) {
        let Some(entry) = self.connections.get(&id) else {
            return;
        };

        let wire = frame.serialize(true);
        match entry
            .writer_tx
            .try_send(Outbound::immediate(wire.clone().into_bytes()))
        {
            Ok(()) => self.record_tx(id, &wire, None, push),
            Err(TrySendError::Full(_)) => self.overflow(id, frame, &wire),
            Err(TrySendError::Closed(_)) => debug!("Writer for {} already stopped", id),
        }
    }

    /// A client stopped draining its queue: log the lost frame and drop it
    fn overflow(&mut self, id: ConnectionId, frame: &Frame, wire: &str) {
        let Some(entry) = self.connections.get(&id) else {
            return;
        };
        let remote_addr = entry.info.remote_addr.clone();
        warn!(
            "Outbound queue for {} ({}) is full, closing: {}",
            id,
            remote_addr,
            wire.trim_end()
        );
        let _ = entry.control_tx.try_send(ConnectionTaskCommand::Close);

        let record = EventRecord::tx(
            &remote_addr,
            wire.trim_end(),
            Some(frame.clone()),
            Outcome::Dropped,
        );
        if let Err(e) = self.simulator.store_mut().append_event(record) {
            warn!("Event log append failed: {}", e);
        }
        self.unregister(id, "outbound queue full");
    }

    fn broadcast(&mut self, frame: &Frame, push: bool) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.send_to(id, frame, push);
        }
    }

    fn push_tick(&mut self, generation: u64, index: usize) {
        let Some(spec) = self.scheduler.spec(generation, index).cloned() else {
            debug!("Ignoring stale push tick");
            return;
        };
        let frame = self.simulator.push_frame(&spec);
        info!(
            "Push {}={} from {} to {} clients",
            frame.cmd,
            frame.val,
            frame.src,
            self.connections.len()
        );
        self.broadcast(&frame, true);
    }

    fn start_push_timers(&mut self, scenario: &Scenario) {
        self.scheduler
            .start(scenario.definition.push_events.clone(), self.self_tx.clone());
    }

    fn activate_scenario(&mut self, name: &str) -> Result<Scenario, BridgeError> {
        let scenario = self.simulator.activate_scenario(name)?;
        self.start_push_timers(&scenario);
        self.emit(EventKind::ScenarioChange {
            name: scenario.name.clone(),
            push_events: self.scheduler.active(),
        });
        Ok(scenario)
    }

    fn startup(&mut self) {
        self.simulator.warn_reserved_faults();
        match self.simulator.store().active_scenario() {
            Ok(Some(scenario)) => {
                if let Err(e) = self.simulator.apply_overrides(&scenario) {
                    warn!("Applying scenario '{}' failed: {}", scenario.name, e);
                }
                info!("Active scenario: '{}'", scenario.name);
                self.start_push_timers(&scenario);
            }
            Ok(None) => info!("No active scenario"),
            Err(e) => warn!("Reading active scenario failed: {}", e),
        }
    }

    fn status(&self) -> TcpStatus {
        TcpStatus {
            listening: self.listening,
            port: self.options.port,
            connections: self.connections.values().map(|c| c.info.clone()).collect(),
            stats: TcpStats {
                uptime: self.started_at.elapsed().as_secs(),
                ..self.stats.clone()
            },
        }
    }

    fn shutdown(&mut self) {
        self.listening = false;
        self.scheduler.cancel();
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            if let Some(entry) = self.connections.get(&id) {
                let _ = entry.control_tx.try_send(ConnectionTaskCommand::Close);
            }
            self.unregister(id, "server shutdown");
        }
    }
}

/// Run the bridge actor
///
/// Processes commands until [`BridgeCommand::Shutdown`] arrives or every
/// strong sender is dropped. On start it applies the active scenario's fault
/// overrides and starts its push timers.
///
/// # Arguments
///
/// * `cmd_rx` - Receiver for commands sent to the actor
/// * `self_tx` - Weak handle to the same channel, given to push timers
/// * `event_tx` - Broadcast sender for observer events
/// * `simulator` - The device simulator; owned by the actor from here on
/// * `options` - Static settings
pub async fn run_bridge_actor(
    mut cmd_rx: mpsc::Receiver<BridgeCommand>,
    self_tx: mpsc::WeakSender<BridgeCommand>,
    event_tx: broadcast::Sender<BridgeEvent>,
    simulator: Simulator,
    options: ActorOptions,
) {
    let mut state = BridgeActorState {
        simulator,
        options,
        connections: BTreeMap::new(),
        next_id: 0,
        scheduler: PushScheduler::new(),
        stats: TcpStats::default(),
        started_at: Instant::now(),
        listening: true,
        event_tx,
        self_tx,
    };
    info!("Bridge actor started");
    state.startup();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            BridgeCommand::RegisterConnection {
                remote_addr,
                writer_tx,
                control_tx,
                response,
            } => {
                let id = state.register(remote_addr, writer_tx, control_tx);
                let _ = response.send(id);
            }

            BridgeCommand::Inbound {
                id,
                lines,
                noise,
                response,
            } => {
                let _ = response.send(state.handle_inbound(id, lines, noise));
            }

            BridgeCommand::UnregisterConnection { id, reason } => {
                state.unregister(id, reason);
            }

            BridgeCommand::PushTick { generation, index } => {
                state.push_tick(generation, index);
            }

            BridgeCommand::Broadcast { frame } => {
                state.broadcast(&frame, false);
            }

            BridgeCommand::ActivateScenario { name, response } => {
                let result = state.activate_scenario(&name);
                if let Err(e) = &result {
                    warn!("Activating scenario '{}' failed: {}", name, e);
                }
                let _ = response.send(result);
            }

            BridgeCommand::SetProperty {
                address,
                property,
                value,
                response,
            } => {
                let result = state
                    .simulator
                    .set_property(&address, &property, &value)
                    .map_err(BridgeError::from);
                state.flush_sim_events();
                let _ = response.send(result);
            }

            BridgeCommand::SetProgrammingMode {
                address,
                enabled,
                response,
            } => {
                let result = state
                    .simulator
                    .set_programming_mode(&address, enabled)
                    .map_err(BridgeError::from);
                let _ = response.send(result);
            }

            BridgeCommand::SetOnline {
                address,
                online,
                response,
            } => {
                let result = state
                    .simulator
                    .set_online(&address, online)
                    .map_err(BridgeError::from);
                let _ = response.send(result);
            }

            BridgeCommand::ListDevices { response } => {
                let result = state.simulator.store().list_devices().map_err(BridgeError::from);
                let _ = response.send(result);
            }

            BridgeCommand::RecentEvents { limit, response } => {
                let result = state
                    .simulator
                    .store()
                    .recent_events(limit)
                    .map_err(BridgeError::from);
                let _ = response.send(result);
            }

            BridgeCommand::QueryStatus { response } => {
                let _ = response.send(state.status());
            }

            BridgeCommand::Shutdown => {
                info!("Bridge actor shutting down");
                state.shutdown();
                break;
            }
        }
    }

    state.scheduler.cancel();
    info!("Bridge actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use homiq_protocol::{FrameId, FrameType};
    use homiq_sim::{
        Direction, FaultInjector, Fixture, MemoryStore, Property, PushEventSpec,
        ScenarioDefinition, ValueGenerator, ValueKind,
    };
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    struct Harness {
        cmd_tx: mpsc::Sender<BridgeCommand>,
        events: broadcast::Receiver<BridgeEvent>,
        actor: JoinHandle<()>,
    }

    fn spawn_actor(store: MemoryStore) -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, events) = broadcast::channel(256);
        let simulator = Simulator::with_injector(Box::new(store), FaultInjector::seeded(5));
        let actor = tokio::spawn(run_bridge_actor(
            cmd_rx,
            cmd_tx.downgrade(),
            event_tx,
            simulator,
            ActorOptions {
                port: 4001,
                max_clients: 1,
            },
        ));
        Harness {
            cmd_tx,
            events,
            actor,
        }
    }

    async fn connect(
        h: &Harness,
    ) -> (
        ConnectionId,
        mpsc::Receiver<Outbound>,
        mpsc::Receiver<ConnectionTaskCommand>,
    ) {
        connect_with_queue(h, 16).await
    }

    async fn connect_with_queue(
        h: &Harness,
        queue: usize,
    ) -> (
        ConnectionId,
        mpsc::Receiver<Outbound>,
        mpsc::Receiver<ConnectionTaskCommand>,
    ) {
        let (writer_tx, writer_rx) = mpsc::channel(queue);
        let (control_tx, control_rx) = mpsc::channel(1);
        let (resp_tx, resp_rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::RegisterConnection {
                remote_addr: "10.0.0.2:5000".into(),
                writer_tx,
                control_tx,
                response: resp_tx,
            })
            .await
            .unwrap();
        (resp_rx.await.unwrap(), writer_rx, control_rx)
    }

    async fn next_event(events: &mut broadcast::Receiver<BridgeEvent>) -> EventKind {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
            .kind
    }

    async fn next_write(rx: &mut mpsc::Receiver<Outbound>) -> String {
        let out = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for write")
            .expect("writer channel closed");
        String::from_utf8(out.data).unwrap()
    }

    /// Send lines as if read from `id`; returns the responses as text
    async fn inbound(h: &Harness, id: ConnectionId, lines: &[&str], noise: u64) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::Inbound {
                id,
                lines: lines.iter().map(|l| l.to_string()).collect(),
                noise,
                response: tx,
            })
            .await
            .unwrap();
        rx.await
            .unwrap()
            .into_iter()
            .map(|out| String::from_utf8(out.data).unwrap())
            .collect()
    }

    async fn status(h: &Harness) -> TcpStatus {
        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::QueryStatus { response: tx })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let mut h = spawn_actor(MemoryStore::seeded());
        let (id, _writer_rx, _control_rx) = connect(&h).await;
        assert_eq!(id, ConnectionId(1));

        match next_event(&mut h.events).await {
            EventKind::Connection { id: got, remote_addr } => {
                assert_eq!(got, id);
                assert_eq!(remote_addr, "10.0.0.2:5000");
            }
            other => panic!("Expected Connection event, got {:?}", other),
        }

        h.cmd_tx
            .send(BridgeCommand::UnregisterConnection {
                id,
                reason: "closed by peer",
            })
            .await
            .unwrap();
        match next_event(&mut h.events).await {
            EventKind::Disconnection { id: got, .. } => assert_eq!(got, id),
            other => panic!("Expected Disconnection event, got {:?}", other),
        }
        assert!(status(&h).await.connections.is_empty());

        h.cmd_tx.send(BridgeCommand::Shutdown).await.unwrap();
        h.actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_frame_is_acked() {
        let mut h = spawn_actor(MemoryStore::seeded());
        let (id, _writer_rx, _control_rx) = connect(&h).await;
        next_event(&mut h.events).await;

        let responses = inbound(&h, id, &["<;HB;1;0;0;1;s;1;>"], 0).await;
        assert_eq!(responses, vec!["<;HB;1;0;0;1;a;32;>\r\n".to_string()]);
        assert!(matches!(
            next_event(&mut h.events).await,
            EventKind::FrameRx { valid: true, .. }
        ));
        match next_event(&mut h.events).await {
            EventKind::FrameTx { frame, push, .. } => {
                assert_eq!(frame, "<;HB;1;0;0;1;a;32;>");
                assert!(!push);
            }
            other => panic!("Expected FrameTx event, got {:?}", other),
        }

        let status = status(&h).await;
        assert_eq!(status.connections[0].rx_count, 1);
        assert_eq!(status.connections[0].tx_count, 1);
        assert_eq!(status.stats.total_tx, 1);
    }

    #[tokio::test]
    async fn test_garbage_counts_as_error() {
        let h = spawn_actor(MemoryStore::seeded());
        let (id, _writer_rx, _control_rx) = connect(&h).await;

        let responses = inbound(&h, id, &["<;HB;1;0;0;999;s;1;>", "<;HB;1;0;0;2;s;1;>"], 2).await;

        // Second line still answered despite the bad checksum
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("<;HB;1;0;0;2;a;"));

        let status = status(&h).await;
        assert_eq!(status.stats.total_rx, 2);
        assert_eq!(status.stats.errors, 3);
    }

    #[tokio::test]
    async fn test_output_write_emits_device_update() {
        let mut h = spawn_actor(MemoryStore::seeded());
        let (id, _writer_rx, _control_rx) = connect(&h).await;
        next_event(&mut h.events).await;

        let frame = Frame::send("O.3", "1", "0", "05", FrameId::new(4).unwrap());
        let wire = frame.serialize(true);
        assert_eq!(inbound(&h, id, &[wire.trim_end()], 0).await.len(), 1);

        let mut saw_update = false;
        for _ in 0..3 {
            if let EventKind::DeviceUpdate {
                device_addr,
                cmd,
                value,
            } = next_event(&mut h.events).await
            {
                assert_eq!((device_addr.as_str(), cmd.as_str(), value.as_str()), ("05", "O.3", "1"));
                saw_update = true;
                break;
            }
        }
        assert!(saw_update);
    }

    #[tokio::test]
    async fn test_scenario_activation_starts_push() {
        let outputs = Device::new("Outputs", "01", "O").with_property(Property::read_write(
            "O.0",
            "O.0",
            ValueKind::Bool,
            "0",
        ));
        let fast = Scenario::new(
            "Fast",
            ScenarioDefinition {
                fault_overrides: Vec::new(),
                push_events: vec![PushEventSpec::new("O.0", "01", 20, ValueGenerator::Toggle)],
            },
        );
        let store = MemoryStore::from_fixture(Fixture {
            devices: vec![outputs],
            faults: Vec::new(),
            scenarios: vec![fast],
        })
        .unwrap();

        let mut h = spawn_actor(store);
        let (_id, mut writer_rx, _control_rx) = connect(&h).await;

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::ActivateScenario {
                name: "Fast".into(),
                response: tx,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap().name, "Fast");

        let first = next_write(&mut writer_rx).await;
        let second = next_write(&mut writer_rx).await;
        assert_eq!(first, Frame::send("O.0", "1", "01", "0", FrameId::new(1).unwrap()).serialize(true));
        assert!(second.starts_with("<;O.0;0;01;0;2;s;"));

        let mut saw_change = false;
        let mut saw_push = false;
        while !(saw_change && saw_push) {
            match next_event(&mut h.events).await {
                EventKind::ScenarioChange { name, push_events } => {
                    assert_eq!(name, "Fast");
                    assert_eq!(push_events, 1);
                    saw_change = true;
                }
                EventKind::FrameTx { push: true, .. } => saw_push = true,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_scenario_is_error() {
        let h = spawn_actor(MemoryStore::seeded());
        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::ActivateScenario {
                name: "Nope".into(),
                response: tx,
            })
            .await
            .unwrap();
        assert!(matches!(
            rx.await.unwrap(),
            Err(BridgeError::StoreError(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_connections() {
        let h = spawn_actor(MemoryStore::seeded());
        let (_a, mut rx_a, _ca) = connect(&h).await;
        // max_clients is 1; the second connection is still accepted
        let (_b, mut rx_b, _cb) = connect(&h).await;

        let frame = Frame::new("I.1", "1", "02", "0", FrameId::MIN, FrameType::Send);
        h.cmd_tx
            .send(BridgeCommand::Broadcast {
                frame: frame.clone(),
            })
            .await
            .unwrap();
        assert_eq!(next_write(&mut rx_a).await, frame.serialize(true));
        assert_eq!(next_write(&mut rx_b).await, frame.serialize(true));
        assert_eq!(status(&h).await.stats.total_tx, 2);
    }

    #[tokio::test]
    async fn test_full_queue_logs_drop_and_closes() {
        let mut h = spawn_actor(MemoryStore::seeded());
        // Nobody drains this queue
        let (id, _writer_rx, mut control_rx) = connect_with_queue(&h, 1).await;
        next_event(&mut h.events).await;

        let first = Frame::new("I.1", "1", "02", "0", FrameId::MIN, FrameType::Send);
        let second = Frame::new("I.1", "0", "02", "0", FrameId::new(2).unwrap(), FrameType::Send);
        for frame in [&first, &second] {
            h.cmd_tx
                .send(BridgeCommand::Broadcast {
                    frame: frame.clone(),
                })
                .await
                .unwrap();
        }

        assert!(matches!(
            next_event(&mut h.events).await,
            EventKind::FrameTx { .. }
        ));
        match next_event(&mut h.events).await {
            EventKind::Disconnection { id: got, .. } => assert_eq!(got, id),
            other => panic!("Expected Disconnection event, got {:?}", other),
        }
        assert!(matches!(
            control_rx.recv().await,
            Some(ConnectionTaskCommand::Close)
        ));

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::RecentEvents {
                limit: 10,
                response: tx,
            })
            .await
            .unwrap();
        let events = rx.await.unwrap().unwrap();
        let dropped = events
            .iter()
            .find(|e| e.direction == Direction::Tx)
            .expect("dropped frame was not logged");
        assert_eq!(dropped.outcome, Outcome::Dropped);
        assert_eq!(dropped.raw_frame, second.serialize(true).trim_end());

        let status = status(&h).await;
        assert!(status.connections.is_empty());
        assert_eq!(status.stats.total_tx, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let h = spawn_actor(MemoryStore::seeded());
        let (_id, mut writer_rx, mut control_rx) = connect(&h).await;

        h.cmd_tx.send(BridgeCommand::Shutdown).await.unwrap();
        h.actor.await.unwrap();

        assert!(matches!(
            control_rx.recv().await,
            Some(ConnectionTaskCommand::Close)
        ));
        // Writer queue closes once the actor drops its sender
        assert!(writer_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_admin_set_property() {
        let mut h = spawn_actor(MemoryStore::seeded());
        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::SetProperty {
                address: "02".into(),
                property: "I.0".into(),
                value: "1".into(),
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            EventKind::DeviceUpdate { .. }
        ));

        let (tx, rx) = oneshot::channel();
        h.cmd_tx
            .send(BridgeCommand::SetOnline {
                address: "99".into(),
                online: false,
                response: tx,
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_err());
    }
}
