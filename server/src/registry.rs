use crate::connection::ConnectionEvent;
use canvas_system::{ChannelKind, ConnectionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, Copy)]
pub struct OutboundLimits {
    /// Messages waiting for the connection actor.
    pub capacity: usize,
    /// Bytes handed to a connection but not yet written to its socket.
    pub byte_budget: usize,
}

impl Default for OutboundLimits {
    fn default() -> Self {
        Self {
            capacity: 64,
            byte_budget: 64 * 1024,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("outbound byte budget exhausted")]
    OverBudget,
    #[error("connection is closed")]
    Closed,
}

/// Bytes in flight towards one socket. Shared by the sending side and every
/// [`Charge`] it hands out.
#[derive(Debug, Clone, Default)]
pub struct ByteBudget(Arc<AtomicUsize>);

impl ByteBudget {
    /// An empty queue always accepts, so a single message larger than the
    /// budget still goes through.
    fn reserve(&self, len: usize, limit: usize) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                if pending == 0 || pending + len <= limit {
                    Some(pending + len)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn release(&self, len: usize) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                Some(pending.saturating_sub(len))
            });
    }

    pub fn pending(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bytes a delivery holds against its connection's budget. Released on drop,
/// which happens once the actor has written the event to its socket.
#[derive(Debug)]
pub struct Charge {
    budget: ByteBudget,
    len: usize,
}

impl Drop for Charge {
    fn drop(&mut self) {
        if self.len > 0 {
            self.budget.release(self.len);
        }
    }
}

#[derive(Debug)]
pub struct Delivery {
    event: ConnectionEvent,
    charge: Charge,
}

impl Delivery {
    pub fn event(&self) -> &ConnectionEvent {
        &self.event
    }

    pub fn into_parts(self) -> (ConnectionEvent, Charge) {
        (self.event, self.charge)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionTx {
    tx: mpsc::Sender<Delivery>,
    budget: ByteBudget,
    byte_limit: usize,
}

pub struct ConnectionRx {
    rx: mpsc::Receiver<Delivery>,
    budget: ByteBudget,
}

pub fn outbound_channel(limits: OutboundLimits) -> (ConnectionTx, ConnectionRx) {
    let (tx, rx) = mpsc::channel(limits.capacity.max(1));
    let budget = ByteBudget::default();
    (
        ConnectionTx {
            tx,
            budget: budget.clone(),
            byte_limit: limits.byte_budget,
        },
        ConnectionRx { rx, budget },
    )
}

impl ConnectionTx {
    /// Never waits. A peer that cannot take the message right now misses it.
    pub fn try_deliver(&self, event: ConnectionEvent) -> Result<(), DeliveryError> {
        if self.tx.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let len = event.byte_len();
        if !self.budget.reserve(len, self.byte_limit) {
            return Err(DeliveryError::OverBudget);
        }
        self.enqueue(event, len)
    }

    /// Same as [`ConnectionTx::try_deliver`] but neither checked against nor
    /// counted towards the byte budget. Only the message-count bound applies.
    pub fn try_deliver_unbudgeted(&self, event: ConnectionEvent) -> Result<(), DeliveryError> {
        if self.tx.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.enqueue(event, 0)
    }

    fn enqueue(&self, event: ConnectionEvent, len: usize) -> Result<(), DeliveryError> {
        let delivery = Delivery {
            event,
            charge: Charge {
                budget: self.budget.clone(),
                len,
            },
        };
        // a rejected delivery is dropped here, which gives its bytes back
        self.tx.try_send(delivery).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl ConnectionRx {
    pub fn budget(&self) -> ByteBudget {
        self.budget.clone()
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Takes the next event and releases its bytes right away.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx
            .try_recv()
            .ok()
            .map(|delivery| delivery.into_parts().0)
    }

    pub fn try_recv_delivery(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

/// Live connections of one channel kind.
pub struct Registry {
    kind: ChannelKind,
    connections: HashMap<ConnectionId, ConnectionTx>,
}

impl Registry {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            connections: HashMap::new(),
        }
    }

    pub fn register(&mut self, tx: ConnectionTx) -> ConnectionId {
        let mut connection_id = ConnectionId::new_v4();
        while self.connections.contains_key(&connection_id) {
            connection_id = ConnectionId::new_v4();
        }
        self.connections.insert(connection_id, tx);
        log::info!(
            "Connection {} registered on {} channel ({} live)",
            connection_id,
            self.kind,
            self.connections.len()
        );
        connection_id
    }

    pub fn unregister(&mut self, connection_id: &ConnectionId) -> bool {
        if self.connections.remove(connection_id).is_some() {
            log::info!(
                "Connection {} left {} channel ({} live)",
                connection_id,
                self.kind,
                self.connections.len()
            );
            true
        } else {
            false
        }
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn send(
        &self,
        to: &ConnectionId,
        event: ConnectionEvent,
    ) -> Result<(), DeliveryError> {
        match self.connections.get(to) {
            Some(tx) => tx.try_deliver(event),
            None => Err(DeliveryError::Closed),
        }
    }

    /// For the burst a connection receives when it becomes active. A large
    /// snapshot must not push the messages right behind it over the budget.
    pub fn send_unbudgeted(
        &self,
        to: &ConnectionId,
        event: ConnectionEvent,
    ) -> Result<(), DeliveryError> {
        match self.connections.get(to) {
            Some(tx) => tx.try_deliver_unbudgeted(event),
            None => Err(DeliveryError::Closed),
        }
    }

    /// Delivers to every live connection except `excluding`. Returns the ids
    /// whose queue turned out to be closed so the caller can clean them up.
    pub fn broadcast(
        &self,
        event: &ConnectionEvent,
        excluding: Option<&ConnectionId>,
    ) -> Vec<ConnectionId> {
        let mut closed = Vec::new();
        for (connection_id, tx) in &self.connections {
            if excluding == Some(connection_id) {
                continue;
            }
            match tx.try_deliver(event.clone()) {
                Ok(()) => {}
                Err(DeliveryError::Closed) => closed.push(*connection_id),
                Err(err) => {
                    log::debug!("Skipping {} on {} channel: {}", connection_id, self.kind, err)
                }
            }
        }
        closed
    }
}
