//! Registry of connected dashboard clients and best-effort fan-out.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::MetricDefinition;
use crate::types::{Snapshot, UpdateMessage};

pub type ClientId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

/// Outbound side of one client connection.
pub trait ClientSink: Send + Sync {
    fn send_text(&self, text: Arc<str>) -> Result<(), SendError>;
}

/// Queue feeding a connection's writer task.
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

impl ClientSink for ChannelSink {
    fn send_text(&self, text: Arc<str>) -> Result<(), SendError> {
        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

#[derive(Default)]
pub struct Broadcaster {
    clients: RwLock<HashMap<ClientId, Arc<dyn ClientSink>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn ClientSink>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sink);
        debug!("client {id} registered");
        id
    }

    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!("client {id} unregistered");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Serialize once and send to every registered client. Failures are
    /// per client; closed clients are dropped from the registry. Returns the
    /// number of clients the message was handed to.
    pub fn publish<T: Serialize>(&self, message: &T) -> usize {
        match serde_json::to_string(message) {
            Ok(json) => self.publish_text(Arc::from(json)),
            Err(e) => {
                error!("failed to encode outbound message: {e}");
                0
            }
        }
    }

    pub fn publish_text(&self, text: Arc<str>) -> usize {
        // Iterate over a copy so register/unregister never wait on sends.
        let clients: Vec<(ClientId, Arc<dyn ClientSink>)> = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sink) in clients {
            match sink.send_text(Arc::clone(&text)) {
                Ok(()) => delivered += 1,
                Err(SendError::Closed) => {
                    debug!("client {id} went away during broadcast");
                    closed.push(id);
                }
                Err(e) => warn!("dropping message for client {id}: {e}"),
            }
        }
        for id in closed {
            self.unregister(id);
        }
        delivered
    }

    /// Push the latest snapshot of `def` as `update<Kind>Data`.
    pub fn publish_update(&self, def: &MetricDefinition, snapshot: &Snapshot) -> usize {
        self.publish(&UpdateMessage {
            purpose: def.kind().update_purpose(),
            id: &def.id,
            data: snapshot,
        })
    }
}
