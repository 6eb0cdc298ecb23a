//! TCP listener and server handle
//!
//! [`BridgeServer::start`] binds the listener, spawns the bridge actor and
//! the accept loop, and returns a [`BridgeHandle`] used to observe and
//! administer the running emulator.

use std::net::SocketAddr;

use homiq_protocol::Frame;
use homiq_sim::{Device, EventRecord, Scenario, Simulator};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actor::{run_bridge_actor, ActorOptions, BridgeCommand, Reply, TcpStatus};
use crate::config::ServerConfig;
use crate::connection::{configure_keepalive, run_reader, run_writer};
use crate::error::BridgeError;
use crate::events::BridgeEvent;

const COMMAND_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 1024;
const OUTBOUND_QUEUE: usize = 64;

/// Entry point for starting the emulated bridge
pub struct BridgeServer;

impl BridgeServer {
    /// Bind the listener and start serving
    pub async fn start(
        config: ServerConfig,
        simulator: Simulator,
    ) -> Result<BridgeHandle, BridgeError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| BridgeError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        let options = ActorOptions {
            port: local_addr.port(),
            max_clients: config.max_clients,
        };
        let actor = tokio::spawn(run_bridge_actor(
            cmd_rx,
            cmd_tx.downgrade(),
            event_tx.clone(),
            simulator,
            options,
        ));

        let (stop_tx, stop_rx) = oneshot::channel();
        let accept = tokio::spawn(run_accept_loop(listener, config, cmd_tx.clone(), stop_rx));

        Ok(BridgeHandle {
            local_addr,
            cmd_tx,
            event_tx,
            stop_tx: Some(stop_tx),
            accept: Some(accept),
            actor: Some(actor),
        })
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("Accept loop stopping");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        if let Err(e) = spawn_connection(stream, peer, &config, &cmd_tx).await {
                            warn!("Could not set up connection from {}: {}", peer, e);
                            if matches!(e, BridgeError::ActorClosed) {
                                break;
                            }
                        }
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
        }
    }
    info!("Listener closed");
}

async fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    cmd_tx: &mpsc::Sender<BridgeCommand>,
) -> Result<(), BridgeError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY on {} failed: {}", peer, e);
    }
    if let Err(e) = configure_keepalive(&stream, config.keep_alive_interval()) {
        warn!("Keepalive on {} failed: {}", peer, e);
    }

    let (read_half, write_half) = stream.into_split();
    let (writer_tx, writer_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (control_tx, control_rx) = mpsc::channel(1);
    let (written_tx, written_rx) = watch::channel(Instant::now());
    let (resp_tx, resp_rx) = oneshot::channel();

    cmd_tx
        .send(BridgeCommand::RegisterConnection {
            remote_addr: peer.to_string(),
            writer_tx: writer_tx.clone(),
            control_tx,
            response: resp_tx,
        })
        .await
        .map_err(|_| BridgeError::ActorClosed)?;
    let id = resp_rx.await.map_err(|_| BridgeError::ActorClosed)?;

    tokio::spawn(run_writer(id, write_half, writer_rx, written_tx));
    tokio::spawn(run_reader(
        id,
        read_half,
        config.connection_timeout(),
        cmd_tx.clone(),
        writer_tx,
        control_rx,
        written_rx,
    ));
    Ok(())
}

/// Handle to a running bridge
pub struct BridgeHandle {
    local_addr: SocketAddr,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    event_tx: broadcast::Sender<BridgeEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
    accept: Option<JoinHandle<()>>,
    actor: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to observer events
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_tx.subscribe()
    }

    /// Sender for raw actor commands
    pub fn commands(&self) -> mpsc::Sender<BridgeCommand> {
        self.cmd_tx.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> BridgeCommand,
    ) -> Result<T, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| BridgeError::ActorClosed)?;
        rx.await.map_err(|_| BridgeError::ActorClosed)?
    }

    /// Status snapshot
    pub async fn status(&self) -> Result<TcpStatus, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCommand::QueryStatus { response: tx })
            .await
            .map_err(|_| BridgeError::ActorClosed)?;
        rx.await.map_err(|_| BridgeError::ActorClosed)
    }

    /// Write a frame to every open connection
    pub async fn broadcast(&self, frame: Frame) -> Result<(), BridgeError> {
        self.cmd_tx
            .send(BridgeCommand::Broadcast { frame })
            .await
            .map_err(|_| BridgeError::ActorClosed)
    }

    /// Make a scenario exclusively active and restart its push timers
    pub async fn activate_scenario(&self, name: &str) -> Result<Scenario, BridgeError> {
        let name = name.to_string();
        self.request(|response| BridgeCommand::ActivateScenario { name, response })
            .await
    }

    /// Set a device property by command or key
    pub async fn set_property(
        &self,
        address: &str,
        property: &str,
        value: &str,
    ) -> Result<(), BridgeError> {
        let (address, property, value) = (address.to_string(), property.to_string(), value.to_string());
        self.request(|response| BridgeCommand::SetProperty {
            address,
            property,
            value,
            response,
        })
        .await
    }

    /// Set a device's programming-mode flag
    pub async fn set_programming_mode(&self, address: &str, enabled: bool) -> Result<(), BridgeError> {
        let address = address.to_string();
        self.request(|response| BridgeCommand::SetProgrammingMode {
            address,
            enabled,
            response,
        })
        .await
    }

    /// Set a device's online flag
    pub async fn set_online(&self, address: &str, online: bool) -> Result<(), BridgeError> {
        let address = address.to_string();
        self.request(|response| BridgeCommand::SetOnline {
            address,
            online,
            response,
        })
        .await
    }

    /// All devices
    pub async fn devices(&self) -> Result<Vec<Device>, BridgeError> {
        self.request(|response| BridgeCommand::ListDevices { response })
            .await
    }

    /// Up to `limit` most recent event log records
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, BridgeError> {
        self.request(|response| BridgeCommand::RecentEvents { limit, response })
            .await
    }

    /// Stop accepting, close every connection, cancel push timers and wait
    /// for the actor to finish
    pub async fn shutdown(mut self) -> Result<(), BridgeError> {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(accept) = self.accept.take() {
            if let Err(e) = accept.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }

        // The actor may already be gone; that is a completed shutdown too
        let _ = self.cmd_tx.send(BridgeCommand::Shutdown).await;
        if let Some(actor) = self.actor.take() {
            if let Err(e) = actor.await {
                warn!("Bridge actor ended abnormally: {}", e);
            }
        }
        info!("Bridge stopped");
        Ok(())
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(accept) = &self.accept {
            accept.abort();
        }
    }
}
