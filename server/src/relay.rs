use actix_web::web::Bytes;
use tokio::sync::mpsc::unbounded_channel;

use canvas_system::{encode_frame, AudioEvent, ChannelKind, ConnectionId};

use crate::connection::{ConnectionCommand, ConnectionEvent};
use crate::registry::Registry;
use crate::server::ServerTx;

/// Fans audio frames out to every other audio connection. Keeps no state
/// beyond the set of live connections and never touches the drawing session.
struct Relay {
    connections: Registry,
}

impl Relay {
    fn new() -> Self {
        Self {
            connections: Registry::new(ChannelKind::Audio),
        }
    }

    fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { tx } => {
                let connection_id = self.connections.register(tx);
                self.greet(&connection_id, ConnectionEvent::Connected { connection_id });
                match (AudioEvent::Id { id: connection_id }).to_json() {
                    Ok(text) => self.greet(&connection_id, ConnectionEvent::Text(text)),
                    Err(err) => log::error!("Failed to encode id for {}: {}", connection_id, err),
                }
            }
            ConnectionCommand::Disconnect { from } => {
                self.connections.unregister(&from);
            }
            ConnectionCommand::Binary { from, bytes } => self.relay(from, &bytes),
            ConnectionCommand::Text { from, text } => {
                log::warn!(
                    "Dropping {} byte text message on audio channel from {}",
                    text.len(),
                    from
                );
            }
        }
    }

    fn relay(&mut self, from: ConnectionId, payload: &[u8]) {
        if !self.connections.contains(&from) {
            log::debug!("Discarding audio from closed connection {}", from);
            return;
        }
        let frame = match encode_frame(from, payload) {
            Ok(frame) => Bytes::from(frame),
            Err(err) => {
                log::warn!("Dropping audio from {}: {}", from, err);
                return;
            }
        };
        let closed = self
            .connections
            .broadcast(&ConnectionEvent::Binary(frame), Some(&from));
        for connection_id in closed {
            self.connections.unregister(&connection_id);
        }
    }

    fn greet(&mut self, to: &ConnectionId, event: ConnectionEvent) {
        if let Err(err) = self.connections.send_unbudgeted(to, event) {
            log::debug!("Could not reach {}: {}", to, err);
        }
    }
}

pub fn spawn_relay() -> ServerTx {
    let (relay_tx, mut relay_rx) = unbounded_channel::<ConnectionCommand>();

    tokio::spawn(async move {
        let mut relay = Relay::new();

        while let Some(command) = relay_rx.recv().await {
            relay.handle_connection_command(command);
        }
        log::info!("audio relay - terminated");
    });

    relay_tx
}
