// WebSocket transport over tokio-tungstenite.
//
// Each connection runs in its own task that owns the socket. The manager
// talks to it through an unbounded command channel and hears back through
// the shared event channel handed out by `WsTransport::new`.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::{ConnectionId, LiveTransport, TransportError, TransportEvent};

pub type TransportEvents = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct SocketHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

pub struct WsTransport {
    events: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    sockets: HashMap<ConnectionId, SocketHandle>,
    next_id: u64,
}

impl WsTransport {
    pub fn new() -> (Self, TransportEvents) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (Self { events, sockets: HashMap::new(), next_id: 0 }, events_rx)
    }
}

impl LiveTransport for WsTransport {
    fn open(&mut self, endpoint: &Url) -> Result<ConnectionId, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| TransportError::Unavailable(error.to_string()))?;
        self.sockets.retain(|_, socket| !socket.task.is_finished());

        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_socket(id, endpoint.clone(), outbound_rx, self.events.clone()));
        self.sockets.insert(id, SocketHandle { outbound, task });
        Ok(id)
    }

    fn send_text(&mut self, connection: ConnectionId, text: String) -> Result<(), TransportError> {
        let socket = self.sockets.get(&connection).ok_or(TransportError::NotWritable(connection))?;
        socket
            .outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::NotWritable(connection))
    }

    fn close(&mut self, connection: ConnectionId, code: u16, reason: &str) {
        if let Some(socket) = self.sockets.remove(&connection) {
            let _ = socket.outbound.send(Outbound::Close { code, reason: reason.to_string() });
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, socket) in self.sockets.drain() {
            socket.task.abort();
        }
    }
}

async fn run_socket(
    id: ConnectionId,
    endpoint: Url,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send((id, event));
    };

    let stream = match connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(error) => {
            debug!(connection = %id, %endpoint, %error, "websocket connect failed");
            emit(TransportEvent::Error(error.to_string()));
            emit(TransportEvent::Closed { code: None, reason: error.to_string() });
            return;
        }
    };
    emit(TransportEvent::Opened);

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Text(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()))
                        .unwrap_or((None, String::new()));
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(Message::Binary(_))) => debug!(connection = %id, "ignoring binary frame"),
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(connection = %id, %error, "websocket read failed");
                    emit(TransportEvent::Error(error.to_string()));
                    emit(TransportEvent::Closed { code: None, reason: error.to_string() });
                    return;
                }
                None => {
                    emit(TransportEvent::Closed { code: None, reason: "stream ended".into() });
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(error) = writer.send(Message::Text(text.into())).await {
                        warn!(connection = %id, %error, "websocket write failed");
                        emit(TransportEvent::Error(error.to_string()));
                        emit(TransportEvent::Closed { code: None, reason: error.to_string() });
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.clone().into() };
                    if let Err(error) = writer.send(Message::Close(Some(frame))).await {
                        debug!(connection = %id, %error, "close frame not delivered");
                    }
                    emit(TransportEvent::Closed { code: Some(code), reason });
                    return;
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }
}
