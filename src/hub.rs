use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_QUEUE_SIZE: usize = 64;
const CLIENT_QUEUE_SIZE: usize = 32;

/// All mutation of the live-connection set goes through this inlet; nothing
/// touches the registry from outside the dispatch loop.
enum HubCommand {
    Register { id: u64, sender: mpsc::Sender<String> },
    Unregister { id: u64 },
    Broadcast { payload: String },
}

/// Registry of connected websocket clients. Runs as a single dispatch task
/// and fans broadcast payloads out to per-client bounded queues, so one
/// stalled client never delays delivery to the rest.
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    clients: HashMap<u64, mpsc::Sender<String>>,
}

/// Cloneable handle for submitting commands to the hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        Self::with_queue_capacity(CLIENT_QUEUE_SIZE)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> (Self, HubHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let hub = Self {
            commands: commands_rx,
            clients: HashMap::new(),
        };
        let handle = HubHandle {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity,
        };
        (hub, handle)
    }

    /// Dispatch loop. Exits when the shutdown token fires or the last handle
    /// is dropped; queued payloads on live clients are left to drain.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Broadcast hub started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Broadcast hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { id, sender } => {
                self.clients.entry(id).or_insert(sender);
                info!(
                    "Registered websocket client {} ({} connected)",
                    id,
                    self.clients.len()
                );
            }
            HubCommand::Unregister { id } => {
                if self.clients.remove(&id).is_some() {
                    info!(
                        "Unregistered websocket client {} ({} connected)",
                        id,
                        self.clients.len()
                    );
                }
            }
            HubCommand::Broadcast { payload } => self.broadcast(payload),
        }
    }

    fn broadcast(&mut self, payload: String) {
        let mut dropped = Vec::new();
        for (id, sender) in &self.clients {
            match sender.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Dropping websocket client {}, outbound queue is full", id);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Dropping websocket client {}, connection is gone", id);
                    dropped.push(*id);
                }
            }
        }
        for id in dropped {
            self.clients.remove(&id);
        }
        debug!("Broadcast enqueued for {} clients", self.clients.len());
    }
}

impl HubHandle {
    /// Adds a connection to the live set and returns its id plus the
    /// outbound payload queue. The queue is closed when the hub drops the
    /// client; the receiver should drain what is left and tear down.
    /// Returns None once the hub has shut down.
    pub async fn register(&self) -> Option<(u64, mpsc::Receiver<String>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.commands
            .send(HubCommand::Register { id, sender })
            .await
            .ok()?;
        Some((id, receiver))
    }

    /// Removes a connection. Safe to call repeatedly, and for an id the hub
    /// already dropped on its own.
    pub async fn unregister(&self, id: u64) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    /// Enqueues a payload for every connection registered at this moment.
    /// Clients that register later do not receive it.
    pub async fn broadcast(&self, payload: String) {
        if self
            .commands
            .send(HubCommand::Broadcast { payload })
            .await
            .is_err()
        {
            debug!("Broadcast hub is shut down, payload dropped");
        }
    }
}
