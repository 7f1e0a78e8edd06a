use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use canvas_system::{ChannelKind, ConnectionId, DrawingCommand, DrawingEvent, Session};

use crate::connection::{ConnectionCommand, ConnectionEvent};
use crate::registry::Registry;

/// Unbounded so that a disconnect notice is never dropped. The loop behind it
/// does no I/O of its own and drains quickly.
pub type ServerTx = UnboundedSender<ConnectionCommand>;

/// Owns the drawing session. Commands from all drawing connections are applied
/// here one at a time, in the order the loop dequeues them.
struct Server {
    session: Session,
    connections: Registry,
}

impl Server {
    fn new() -> Self {
        Self {
            session: Session::new(),
            connections: Registry::new(ChannelKind::Drawing),
        }
    }

    fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { tx } => {
                let connection_id = self.connections.register(tx);
                self.greet(&connection_id, ConnectionEvent::Connected { connection_id });
                for event in self.session.join(connection_id) {
                    self.greet_event(&connection_id, &event);
                }
            }
            ConnectionCommand::Disconnect { from } => self.disconnect(&from),
            ConnectionCommand::Text { from, text } => {
                if !self.connections.contains(&from) {
                    log::debug!("Discarding message from closed connection {}", from);
                    return;
                }
                match DrawingCommand::from_json(&text) {
                    Ok(command) => {
                        log::debug!("Ingress from {}: {:?}", from, command);
                        if let Some(event) = self.session.apply(from, command) {
                            self.broadcast_event(&event);
                        }
                    }
                    Err(err) => log::warn!("Dropping message from {}: {}", from, err),
                }
            }
            ConnectionCommand::Binary { from, bytes } => {
                log::warn!(
                    "Dropping {} byte binary frame on drawing channel from {}",
                    bytes.len(),
                    from
                );
            }
        }
    }

    fn disconnect(&mut self, connection_id: &ConnectionId) {
        if !self.connections.unregister(connection_id) {
            return;
        }
        if let Some(event) = self.session.leave(connection_id) {
            self.broadcast_event(&event);
        }
    }

    /// The join burst is not held to the byte budget, so a history snapshot of
    /// any size is followed by the cursor map and by later broadcasts.
    fn greet(&mut self, to: &ConnectionId, event: ConnectionEvent) {
        if let Err(err) = self.connections.send_unbudgeted(to, event) {
            log::debug!("Could not reach {}: {}", to, err);
        }
    }

    fn greet_event(&mut self, to: &ConnectionId, event: &DrawingEvent) {
        match event.to_json() {
            Ok(text) => self.greet(to, ConnectionEvent::Text(text)),
            Err(err) => log::error!("Failed to encode {:?}: {}", event, err),
        }
    }

    fn broadcast_event(&mut self, event: &DrawingEvent) {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(err) => {
                log::error!("Failed to encode {:?}: {}", event, err);
                return;
            }
        };
        log::debug!("Egress to {} connections: {}", self.connections.len(), text);
        let closed = self
            .connections
            .broadcast(&ConnectionEvent::Text(text), None);
        for connection_id in closed {
            self.disconnect(&connection_id);
        }
    }
}

pub fn spawn_server() -> ServerTx {
    let (srv_tx, mut srv_rx) = unbounded_channel::<ConnectionCommand>();

    tokio::spawn(async move {
        let mut server = Server::new();

        while let Some(command) = srv_rx.recv().await {
            server.handle_connection_command(command);
        }
        log::info!("drawing loop - terminated");
    });

    srv_tx
}
