use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::web::{self, Bytes};
use actix_web::{Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use canvas_system::{ChannelKind, ConnectionId};

use crate::registry::{outbound_channel, ConnectionRx, ConnectionTx, Delivery, OutboundLimits};
use crate::server::ServerTx;

/// Ingress, from a connection actor to the loop that owns its channel.
#[derive(Debug)]
pub enum ConnectionCommand {
    Connect { tx: ConnectionTx },
    Disconnect { from: ConnectionId },
    Text { from: ConnectionId, text: String },
    Binary { from: ConnectionId, bytes: Bytes },
}

/// Egress, from a channel loop to one connection actor.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected { connection_id: ConnectionId },
    Text(String),
    Binary(Bytes),
}

impl ConnectionEvent {
    pub fn byte_len(&self) -> usize {
        match self {
            ConnectionEvent::Connected { .. } => 0,
            ConnectionEvent::Text(text) => text.len(),
            ConnectionEvent::Binary(bytes) => bytes.len(),
        }
    }
}

/// Shared by every HTTP worker.
pub struct AppState {
    pub drawing_tx: ServerTx,
    pub audio_tx: ServerTx,
    pub limits: OutboundLimits,
    pub max_frame_size: usize,
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(Delivery);

/// Drawing frames held while the loop has not yet assigned an id. Past this
/// the oldest held frames are kept and later ones dropped.
const MAX_HELD_FRAMES: usize = 64;

/// An inbound frame not yet tagged with its sender.
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    fn into_command(self, from: ConnectionId) -> ConnectionCommand {
        match self {
            Frame::Text(text) => ConnectionCommand::Text { from, text },
            Frame::Binary(bytes) => ConnectionCommand::Binary { from, bytes },
        }
    }
}

enum ConnectionState {
    Idle,
    Connected(ConnectionId),
    Closed,
}

/// Ingress half of a connection: tags frames with the connection's id and
/// hands them to the channel loop.
struct Ingress {
    kind: ChannelKind,
    state: ConnectionState,
    held: Vec<Frame>,
    srv_tx: ServerTx,
}

impl Ingress {
    fn new(kind: ChannelKind, srv_tx: ServerTx) -> Self {
        Self {
            kind,
            state: ConnectionState::Idle,
            held: Vec::new(),
            srv_tx,
        }
    }

    fn register(&self, tx: ConnectionTx) -> bool {
        self.srv_tx.send(ConnectionCommand::Connect { tx }).is_ok()
    }

    fn accept(&mut self, frame: Frame) {
        match self.state {
            ConnectionState::Connected(from) => self.forward(frame.into_command(from)),
            ConnectionState::Idle => match self.kind {
                // a client may draw as soon as its socket opens
                ChannelKind::Drawing if self.held.len() < MAX_HELD_FRAMES => {
                    log::debug!("Holding drawing frame until handshake completes");
                    self.held.push(frame);
                }
                ChannelKind::Drawing => {
                    log::warn!("Dropping drawing frame, {} already held", MAX_HELD_FRAMES)
                }
                // audio is only relayed once the sender knows its own id
                ChannelKind::Audio => log::debug!("Dropping audio frame before handshake"),
            },
            ConnectionState::Closed => {}
        }
    }

    /// Held frames go out first, in arrival order.
    fn activate(&mut self, connection_id: ConnectionId) {
        if !matches!(self.state, ConnectionState::Idle) {
            return;
        }
        self.state = ConnectionState::Connected(connection_id);
        for frame in std::mem::take(&mut self.held) {
            self.forward(frame.into_command(connection_id));
        }
    }

    fn close(&mut self) {
        if let ConnectionState::Connected(from) = self.state {
            self.forward(ConnectionCommand::Disconnect { from });
        }
        self.state = ConnectionState::Closed;
        self.held.clear();
    }

    fn forward(&self, command: ConnectionCommand) {
        if self.srv_tx.send(command).is_err() {
            log::error!("{} loop has stopped", self.kind);
        }
    }
}

/// Where the egress task hands deliveries.
trait EgressSink {
    fn is_alive(&self) -> bool;
    fn deliver(&self, delivery: Delivery);
}

impl EgressSink for Addr<ConnectionActor> {
    fn is_alive(&self) -> bool {
        self.connected()
    }

    fn deliver(&self, delivery: Delivery) {
        self.do_send(ConnectionActorMessage(delivery));
    }
}

/// Forwards one connection's outbound queue to its actor until either side
/// goes away.
async fn run_egress<S: EgressSink>(
    kind: ChannelKind,
    mut rx: ConnectionRx,
    sink: S,
    srv_tx: ServerTx,
) {
    log::debug!("{} egress task - started", kind);
    let mut connection_id = None;
    while let Some(delivery) = rx.recv().await {
        if let ConnectionEvent::Connected { connection_id: id } = delivery.event() {
            connection_id = Some(*id);
        }
        if !sink.is_alive() {
            // The actor may have died before it learned its id; clean up on its behalf.
            if let Some(from) = connection_id {
                let _ = srv_tx.send(ConnectionCommand::Disconnect { from });
            }
            break;
        }
        sink.deliver(delivery);
    }
    log::debug!("{} egress task - terminated", kind);
}

struct ConnectionActor {
    ingress: Ingress,
    limits: OutboundLimits,
}

impl ConnectionActor {
    fn new(kind: ChannelKind, srv_tx: ServerTx, limits: OutboundLimits) -> Self {
        Self {
            ingress: Ingress::new(kind, srv_tx),
            limits,
        }
    }

    fn kind(&self) -> ChannelKind {
        self.ingress.kind
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, rx) = outbound_channel(self.limits);

        if !self.ingress.register(tx) {
            log::error!("{} loop has stopped, refusing connection", self.kind());
            ctx.stop();
            return;
        }

        tokio::spawn(run_egress(
            self.kind(),
            rx,
            ctx.address(),
            self.ingress.srv_tx.clone(),
        ));
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.ingress.close();
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => {
                log::debug!("Ingress {} text, size: {}", self.kind(), text.len());
                self.ingress.accept(Frame::Text(text.to_string()));
            }
            Ok(ws::Message::Binary(bytes)) => {
                log::debug!("Ingress {} binary, size: {}", self.kind(), bytes.len());
                self.ingress.accept(Frame::Binary(bytes));
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                log::warn!("{} protocol error: {}", self.kind(), err);
                ctx.stop();
            }
            _ => (),
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        // the budget is charged until the frame is in the websocket context
        let (event, _charge) = msg.0.into_parts();
        match event {
            ConnectionEvent::Connected { connection_id } => {
                log::info!("{} connection {} active", self.kind(), connection_id);
                self.ingress.activate(connection_id);
            }
            ConnectionEvent::Text(text) => ctx.text(text),
            ConnectionEvent::Binary(bytes) => ctx.binary(bytes),
        }
    }
}

fn start(
    kind: ChannelKind,
    srv_tx: &ServerTx,
    state: &AppState,
    req: &HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    ws::WsResponseBuilder::new(
        ConnectionActor::new(kind, srv_tx.clone(), state.limits),
        req,
        stream,
    )
    .frame_size(state.max_frame_size)
    .start()
}

pub async fn drawing_ws_index(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    start(ChannelKind::Drawing, &state.drawing_tx, &state, &req, stream)
}

pub async fn audio_ws_index(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    start(ChannelKind::Audio, &state.audio_tx, &state, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// Stands in for the actor. Stops accepting after `lives` deliveries.
    struct RecordingSink {
        lives: Cell<usize>,
        delivered: RefCell<Vec<ConnectionEvent>>,
    }

    impl RecordingSink {
        fn new(lives: usize) -> Self {
            Self {
                lives: Cell::new(lives),
                delivered: RefCell::new(Vec::new()),
            }
        }
    }

    impl EgressSink for &RecordingSink {
        fn is_alive(&self) -> bool {
            self.lives.get() > 0
        }

        fn deliver(&self, delivery: Delivery) {
            self.lives.set(self.lives.get() - 1);
            self.delivered.borrow_mut().push(delivery.into_parts().0);
        }
    }

    fn drain(srv_rx: &mut UnboundedReceiver<ConnectionCommand>) -> Vec<ConnectionCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = srv_rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    fn texts(commands: &[ConnectionCommand]) -> Vec<(ConnectionId, String)> {
        commands
            .iter()
            .map(|command| match command {
                ConnectionCommand::Text { from, text } => (*from, text.clone()),
                other => panic!("expected text, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn it_holds_drawing_frames_until_handshake() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let mut ingress = Ingress::new(ChannelKind::Drawing, srv_tx);

        ingress.accept(Frame::Text("first".into()));
        ingress.accept(Frame::Text("second".into()));
        assert!(drain(&mut srv_rx).is_empty());

        let id = ConnectionId::new_v4();
        ingress.activate(id);
        ingress.accept(Frame::Text("third".into()));
        assert_eq!(
            texts(&drain(&mut srv_rx)),
            vec![
                (id, "first".to_string()),
                (id, "second".to_string()),
                (id, "third".to_string())
            ]
        );

        // a second handshake changes nothing
        ingress.activate(ConnectionId::new_v4());
        ingress.accept(Frame::Text("fourth".into()));
        assert_eq!(texts(&drain(&mut srv_rx)), vec![(id, "fourth".to_string())]);
    }

    #[test]
    fn it_bounds_frames_held_before_handshake() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let mut ingress = Ingress::new(ChannelKind::Drawing, srv_tx);

        for i in 0..MAX_HELD_FRAMES + 10 {
            ingress.accept(Frame::Text(i.to_string()));
        }
        let id = ConnectionId::new_v4();
        ingress.activate(id);

        let forwarded = texts(&drain(&mut srv_rx));
        assert_eq!(forwarded.len(), MAX_HELD_FRAMES);
        assert_eq!(forwarded[0], (id, "0".to_string()));
        assert_eq!(
            forwarded[MAX_HELD_FRAMES - 1],
            (id, (MAX_HELD_FRAMES - 1).to_string())
        );
    }

    #[test]
    fn it_drops_audio_before_handshake() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let mut ingress = Ingress::new(ChannelKind::Audio, srv_tx);

        ingress.accept(Frame::Binary(Bytes::from_static(b"early")));
        let id = ConnectionId::new_v4();
        ingress.activate(id);
        assert!(drain(&mut srv_rx).is_empty());

        ingress.accept(Frame::Binary(Bytes::from_static(b"pcm")));
        match drain(&mut srv_rx).as_slice() {
            [ConnectionCommand::Binary { from, bytes }] => {
                assert_eq!(*from, id);
                assert_eq!(bytes.as_ref(), b"pcm");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn it_announces_disconnect_once() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let mut ingress = Ingress::new(ChannelKind::Drawing, srv_tx);
        let id = ConnectionId::new_v4();
        ingress.activate(id);

        ingress.close();
        ingress.close();
        ingress.accept(Frame::Text("late".into()));
        match drain(&mut srv_rx).as_slice() {
            [ConnectionCommand::Disconnect { from }] => assert_eq!(*from, id),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn it_stays_silent_when_closed_before_handshake() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let mut ingress = Ingress::new(ChannelKind::Drawing, srv_tx);
        ingress.accept(Frame::Text("held".into()));

        ingress.close();
        ingress.activate(ConnectionId::new_v4());
        assert!(drain(&mut srv_rx).is_empty());
    }

    #[tokio::test]
    async fn it_forwards_in_order_and_releases_bytes() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let (tx, rx) = outbound_channel(OutboundLimits::default());
        let budget = rx.budget();
        let id = ConnectionId::new_v4();

        tx.try_deliver_unbudgeted(ConnectionEvent::Connected { connection_id: id })
            .expect("");
        tx.try_deliver(ConnectionEvent::Text("hello".into())).expect("");
        tx.try_deliver(ConnectionEvent::Binary(Bytes::from_static(b"pcm")))
            .expect("");
        assert_eq!(budget.pending(), 8);
        drop(tx);

        let sink = RecordingSink::new(usize::MAX);
        run_egress(ChannelKind::Drawing, rx, &sink, srv_tx).await;

        assert_eq!(
            sink.delivered.into_inner(),
            vec![
                ConnectionEvent::Connected { connection_id: id },
                ConnectionEvent::Text("hello".into()),
                ConnectionEvent::Binary(Bytes::from_static(b"pcm")),
            ]
        );
        assert_eq!(budget.pending(), 0);
        assert!(drain(&mut srv_rx).is_empty());
    }

    #[tokio::test]
    async fn it_disconnects_on_behalf_of_actor_that_died() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let (tx, rx) = outbound_channel(OutboundLimits::default());
        let budget = rx.budget();
        let id = ConnectionId::new_v4();

        tx.try_deliver_unbudgeted(ConnectionEvent::Connected { connection_id: id })
            .expect("");
        tx.try_deliver(ConnectionEvent::Text("history".into()))
            .expect("");

        // the actor is gone before the first delivery reaches it
        let sink = RecordingSink::new(0);
        run_egress(ChannelKind::Drawing, rx, &sink, srv_tx).await;

        assert!(sink.delivered.borrow().is_empty());
        match drain(&mut srv_rx).as_slice() {
            [ConnectionCommand::Disconnect { from }] => assert_eq!(*from, id),
            other => panic!("unexpected {:?}", other),
        }
        assert!(tx.try_deliver(ConnectionEvent::Text("late".into())).is_err());
        assert_eq!(budget.pending(), 0);
    }

    #[tokio::test]
    async fn it_disconnects_when_actor_dies_after_handshake() {
        let (srv_tx, mut srv_rx) = unbounded_channel();
        let (tx, rx) = outbound_channel(OutboundLimits::default());
        let id = ConnectionId::new_v4();

        tx.try_deliver_unbudgeted(ConnectionEvent::Connected { connection_id: id })
            .expect("");
        tx.try_deliver(ConnectionEvent::Text("draw".into())).expect("");

        let sink = RecordingSink::new(1);
        run_egress(ChannelKind::Audio, rx, &sink, srv_tx).await;

        assert_eq!(
            sink.delivered.into_inner(),
            vec![ConnectionEvent::Connected { connection_id: id }]
        );
        match drain(&mut srv_rx).as_slice() {
            [ConnectionCommand::Disconnect { from }] => assert_eq!(*from, id),
            other => panic!("unexpected {:?}", other),
        }
    }
}
