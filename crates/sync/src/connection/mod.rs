// Live channel connection manager: one duplex connection per mounted room.
//
// The manager is a pure state machine. It never blocks and never touches a
// socket directly: it drives a `LiveTransport` (fire-and-forget open/send/
// close) and is fed `TransportEvent`s as they arrive. Time is passed in so
// the single reconnect timer can be tested without a clock.
//
//   idle ──subscribe──▶ connecting ──opened──▶ open
//                           ▲                   │ remote close / error
//                           │ timer             ▼
//                           └────────────── closed
//   any ──unsubscribe──▶ idle   (clean close, timer cancelled)

pub mod ws;

use std::fmt;
use std::time::Duration;

use nomad_common::protocol::ws::{FrameError, InboundFrame, OutboundFrame};
use nomad_common::time::Timestamp;
use nomad_common::types::{Entry, Feed, LocalIdentity, RoomId};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Constant delay between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Close code for an intentional local teardown.
pub const CLEAN_CLOSE_CODE: u16 = 1000;

/// Close code used when the local side abandons a broken connection.
pub const BROKEN_CLOSE_CODE: u16 = 1011;

/// Indicator text surfaced to the view on transport errors.
pub const CONNECTION_ERROR_INDICATOR: &str = "Connection error. Retrying...";

// ── Transport trait ─────────────────────────────────────────────────

/// Handle for one physical connection. Events carry it so that late events
/// from a superseded connection can be told apart and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Abstraction over the duplex transport for testability.
///
/// Every method returns immediately; outcomes arrive later as
/// `TransportEvent`s for the returned `ConnectionId`.
pub trait LiveTransport {
    /// Start opening a connection to `endpoint`.
    fn open(&mut self, endpoint: &Url) -> Result<ConnectionId, TransportError>;

    /// Queue a text frame on an open connection.
    fn send_text(&mut self, connection: ConnectionId, text: String) -> Result<(), TransportError>;

    /// Close a connection. No further events are expected for it.
    fn close(&mut self, connection: ConnectionId, code: u16, reason: &str);
}

/// Lifecycle and data events reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("{0} is not writable")]
    NotWritable(ConnectionId),
}

// ── Connection state ────────────────────────────────────────────────

/// Current state of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Local close of a broken connection in progress; a reconnect follows.
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// The room a manager is subscribed to and who is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSubscription {
    pub feed: Feed,
    pub room_id: RoomId,
    pub identity: LocalIdentity,
    pub endpoint: Url,
}

/// The single scheduled reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    pub due: Instant,
    pub attempt: u32,
}

// ── Events ──────────────────────────────────────────────────────────

/// Outcomes the owner of the manager reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// A normalized live entry for the merger.
    Delivered(Entry),
    /// Transport trouble; the view shows a non-fatal indicator.
    Error { message: String },
    ReconnectScheduled { delay: Duration, attempt: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("cannot send: connection is {0}")]
    NotOpen(ConnectionState),
    #[error("cannot send an empty message")]
    EmptyMessage,
    #[error(transparent)]
    Encode(#[from] FrameError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ── Connection manager ──────────────────────────────────────────────

/// Owns the lifecycle of one live connection and its reconnect timer.
pub struct ConnectionManager<T: LiveTransport> {
    transport: T,
    reconnect_delay: Duration,
    state: ConnectionState,
    subscription: Option<RoomSubscription>,
    active: Option<ConnectionId>,
    pending_reconnect: Option<PendingReconnect>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl<T: LiveTransport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            state: ConnectionState::Idle,
            subscription: None,
            active: None,
            pending_reconnect: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn subscription(&self) -> Option<&RoomSubscription> {
        self.subscription.as_ref()
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.pending_reconnect
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// When the owner must call `poll_timers` next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_reconnect.map(|pending| pending.due)
    }

    /// Subscribe to a room and start connecting. Subscribing to a different
    /// room tears the current connection down first.
    pub fn subscribe(&mut self, subscription: RoomSubscription, now: Instant) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        if let Some(current) = &self.subscription {
            if *current == subscription {
                return self.connect(now);
            }
            events.extend(self.unsubscribe());
        }

        info!(
            feed = %subscription.feed,
            room_id = %subscription.room_id,
            endpoint = %subscription.endpoint,
            "subscribing to room"
        );
        self.subscription = Some(subscription);
        events.extend(self.connect(now));
        events
    }

    /// Open the connection for the current subscription. A no-op while a
    /// connection is already connecting, open, or closing.
    pub fn connect(&mut self, now: Instant) -> Vec<ConnectionEvent> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        ) {
            debug!(state = %self.state, "connect ignored: connection already live");
            return Vec::new();
        }
        let Some(subscription) = &self.subscription else {
            debug!("connect ignored: no subscription");
            return Vec::new();
        };

        self.pending_reconnect = None;
        match self.transport.open(&subscription.endpoint) {
            Ok(connection) => {
                debug!(%connection, room_id = %subscription.room_id, "opening live connection");
                self.active = Some(connection);
                vec![self.set_state(ConnectionState::Connecting)]
            }
            Err(error) => {
                warn!(%error, "failed to start live connection");
                self.active = None;
                let mut events = vec![self.set_state(ConnectionState::Closed)];
                events.push(self.record_error());
                events.push(self.schedule_reconnect(now));
                events
            }
        }
    }

    /// Process one transport event. Events for anything but the active
    /// connection are stale and ignored.
    pub fn handle_event(
        &mut self,
        connection: ConnectionId,
        event: TransportEvent,
        now: Instant,
    ) -> Vec<ConnectionEvent> {
        if self.active != Some(connection) {
            debug!(%connection, ?event, "ignoring event for inactive connection");
            return Vec::new();
        }

        match event {
            TransportEvent::Opened => self.on_opened(connection),
            TransportEvent::Text(text) => self.on_text(&text).into_iter().collect(),
            TransportEvent::Closed { code, reason } => {
                info!(%connection, ?code, %reason, "live connection closed");
                self.active = None;
                vec![self.set_state(ConnectionState::Closed), self.schedule_reconnect(now)]
            }
            TransportEvent::Error(message) => {
                warn!(%connection, %message, "live connection error");
                vec![self.record_error()]
            }
        }
    }

    /// Fire the reconnect timer if it is due.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<ConnectionEvent> {
        match self.pending_reconnect {
            Some(pending) if pending.due <= now => {
                self.pending_reconnect = None;
                info!(attempt = pending.attempt, "reconnecting live channel");
                self.connect(now)
            }
            _ => Vec::new(),
        }
    }

    /// Tear down: cancel the timer, close cleanly, forget the subscription.
    pub fn unsubscribe(&mut self) -> Vec<ConnectionEvent> {
        self.pending_reconnect = None;
        if let Some(connection) = self.active.take() {
            self.transport.close(connection, CLEAN_CLOSE_CODE, "view unmounted");
        }
        if let Some(subscription) = self.subscription.take() {
            info!(room_id = %subscription.room_id, "unsubscribed from room");
        }
        self.consecutive_failures = 0;
        self.last_error = None;
        if self.state == ConnectionState::Idle {
            return Vec::new();
        }
        vec![self.set_state(ConnectionState::Idle)]
    }

    /// Send a chat message. Only permitted while open; there is no queue.
    pub fn send(&mut self, text: &str) -> Result<(), SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let (Some(connection), Some(subscription), ConnectionState::Open) =
            (self.active, &self.subscription, self.state)
        else {
            return Err(SendError::NotOpen(self.state));
        };

        let frame = OutboundFrame::message(&subscription.room_id, &subscription.identity, text);
        let encoded = frame.encode()?;
        if let Err(error) = self.transport.send_text(connection, encoded) {
            self.abandon(connection, &error);
            return Err(error.into());
        }
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn on_opened(&mut self, connection: ConnectionId) -> Vec<ConnectionEvent> {
        let Some(subscription) = &self.subscription else {
            return Vec::new();
        };
        let join = OutboundFrame::join(&subscription.room_id, &subscription.identity);
        info!(%connection, room_id = %subscription.room_id, "live connection open, joining room");

        self.pending_reconnect = None;
        self.consecutive_failures = 0;
        self.last_error = None;
        let opened = self.set_state(ConnectionState::Open);

        let sent = join
            .encode()
            .map_err(|error| TransportError::Unavailable(error.to_string()))
            .and_then(|encoded| self.transport.send_text(connection, encoded));
        if let Err(error) = sent {
            self.abandon(connection, &error);
            return vec![opened, self.set_state(ConnectionState::Closing)];
        }
        vec![opened]
    }

    fn on_text(&mut self, text: &str) -> Option<ConnectionEvent> {
        let subscription = self.subscription.as_ref()?;
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping undecodable frame");
                return None;
            }
        };

        let entry = match (frame, subscription.feed) {
            (InboundFrame::Message(payload), Feed::CityChat | Feed::MeetupChat) => payload
                .into_wire()
                .into_message(&subscription.room_id, &subscription.identity, Timestamp::now())
                .map(Entry::Message),
            (InboundFrame::NewIncident(payload), Feed::Incidents) => {
                payload.into_wire().into_incident(Timestamp::now()).map(Entry::Incident)
            }
            (InboundFrame::Unknown, _) => {
                debug!("dropping frame of unknown type");
                return None;
            }
            (frame, feed) => {
                debug!(%feed, ?frame, "dropping frame not meant for this feed");
                return None;
            }
        };

        match entry {
            Ok(entry) => Some(ConnectionEvent::Delivered(entry)),
            Err(error) => {
                warn!(%error, "dropping malformed live entry");
                None
            }
        }
    }

    /// Close a connection whose writer failed; the close event reconnects.
    fn abandon(&mut self, connection: ConnectionId, error: &TransportError) {
        warn!(%connection, %error, "abandoning broken live connection");
        self.transport.close(connection, BROKEN_CLOSE_CODE, "write failed");
        self.state = ConnectionState::Closing;
    }

    fn record_error(&mut self) -> ConnectionEvent {
        self.last_error = Some(CONNECTION_ERROR_INDICATOR.to_string());
        ConnectionEvent::Error { message: CONNECTION_ERROR_INDICATOR.to_string() }
    }

    /// Replace any pending attempt with one `reconnect_delay` from now.
    fn schedule_reconnect(&mut self, now: Instant) -> ConnectionEvent {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let attempt = self.consecutive_failures;
        self.pending_reconnect = Some(PendingReconnect { due: now + self.reconnect_delay, attempt });
        debug!(attempt, delay_ms = self.reconnect_delay.as_millis() as u64, "reconnect scheduled");
        ConnectionEvent::ReconnectScheduled { delay: self.reconnect_delay, attempt }
    }

    fn set_state(&mut self, state: ConnectionState) -> ConnectionEvent {
        self.state = state;
        ConnectionEvent::StateChanged(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nomad_common::types::{EntryId, Ownership};

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct MockTransport {
        next_id: u64,
        /// Connections opened, in order.
        opened: Vec<(ConnectionId, Url)>,
        /// Frames sent, per connection.
        sent: Vec<(ConnectionId, String)>,
        /// Connections closed with their codes.
        closed: Vec<(ConnectionId, u16)>,
        /// If set, open() fails with this message.
        open_error: Option<String>,
        /// If set, send_text() fails.
        send_fails: bool,
    }

    impl MockTransport {
        fn sent_json(&self) -> Vec<serde_json::Value> {
            self.sent
                .iter()
                .map(|(_, text)| serde_json::from_str(text).expect("sent frames are JSON"))
                .collect()
        }

        fn live_connections(&self) -> usize {
            self.opened.iter().filter(|(id, _)| !self.closed.iter().any(|(c, _)| c == id)).count()
        }
    }

    impl LiveTransport for MockTransport {
        fn open(&mut self, endpoint: &Url) -> Result<ConnectionId, TransportError> {
            if let Some(message) = &self.open_error {
                return Err(TransportError::Unavailable(message.clone()));
            }
            self.next_id += 1;
            let id = ConnectionId(self.next_id);
            self.opened.push((id, endpoint.clone()));
            Ok(id)
        }

        fn send_text(&mut self, connection: ConnectionId, text: String) -> Result<(), TransportError> {
            if self.send_fails {
                return Err(TransportError::NotWritable(connection));
            }
            self.sent.push((connection, text));
            Ok(())
        }

        fn close(&mut self, connection: ConnectionId, code: u16, _reason: &str) {
            self.closed.push((connection, code));
        }
    }

    fn identity() -> LocalIdentity {
        LocalIdentity { id: "ayesha@example.com".into(), name: "Ayesha".into() }
    }

    fn subscription(feed: Feed, room: &str) -> RoomSubscription {
        RoomSubscription {
            feed,
            room_id: RoomId::from(room),
            identity: identity(),
            endpoint: Url::parse("ws://localhost:8080/chat").expect("valid url"),
        }
    }

    fn open_manager(feed: Feed, room: &str, now: Instant) -> ConnectionManager<MockTransport> {
        let mut mgr = ConnectionManager::new(MockTransport::default());
        mgr.subscribe(subscription(feed, room), now);
        let id = mgr.active.expect("connection started");
        mgr.handle_event(id, TransportEvent::Opened, now);
        mgr
    }

    fn active(mgr: &ConnectionManager<MockTransport>) -> ConnectionId {
        mgr.active.expect("active connection")
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn subscribe_moves_idle_to_connecting() {
        let mut mgr = ConnectionManager::new(MockTransport::default());
        assert_eq!(mgr.state(), ConnectionState::Idle);

        let events = mgr.subscribe(subscription(Feed::CityChat, "R1"), Instant::now());
        assert_eq!(events, vec![ConnectionEvent::StateChanged(ConnectionState::Connecting)]);
        assert_eq!(mgr.transport.opened.len(), 1);
    }

    #[test]
    fn open_sends_exactly_one_join_frame() {
        let mgr = open_manager(Feed::CityChat, "R1", Instant::now());
        assert_eq!(mgr.state(), ConnectionState::Open);
        assert_eq!(
            mgr.transport.sent_json(),
            vec![serde_json::json!({
                "type": "join",
                "roomId": "R1",
                "userId": "ayesha@example.com",
                "userName": "Ayesha"
            })]
        );
    }

    #[test]
    fn connect_twice_keeps_a_single_connection() {
        let now = Instant::now();
        let mut mgr = ConnectionManager::new(MockTransport::default());
        mgr.subscribe(subscription(Feed::CityChat, "R1"), now);
        assert!(mgr.connect(now).is_empty());
        assert_eq!(mgr.transport.opened.len(), 1);

        let id = active(&mgr);
        mgr.handle_event(id, TransportEvent::Opened, now);
        assert!(mgr.connect(now).is_empty());
        assert_eq!(mgr.transport.opened.len(), 1);
        assert_eq!(mgr.transport.live_connections(), 1);
    }

    #[test]
    fn resubscribing_same_room_is_a_noop() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        assert!(mgr.subscribe(subscription(Feed::CityChat, "R1"), now).is_empty());
        assert_eq!(mgr.transport.opened.len(), 1);
    }

    #[test]
    fn subscribing_to_another_room_tears_down_first() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let old = active(&mgr);

        let events = mgr.subscribe(subscription(Feed::CityChat, "R2"), now);
        assert_eq!(
            events,
            vec![
                ConnectionEvent::StateChanged(ConnectionState::Idle),
                ConnectionEvent::StateChanged(ConnectionState::Connecting),
            ]
        );
        assert_eq!(mgr.transport.closed, vec![(old, CLEAN_CLOSE_CODE)]);
        assert_eq!(mgr.transport.live_connections(), 1);
        assert_eq!(mgr.subscription().map(|s| s.room_id.as_str()), Some("R2"));
    }

    // ── Reconnection ────────────────────────────────────────────────

    #[test]
    fn remote_close_schedules_constant_delay_reconnect() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);

        let events = mgr.handle_event(
            id,
            TransportEvent::Closed { code: Some(1006), reason: "gone".into() },
            now,
        );
        assert_eq!(
            events,
            vec![
                ConnectionEvent::StateChanged(ConnectionState::Closed),
                ConnectionEvent::ReconnectScheduled { delay: DEFAULT_RECONNECT_DELAY, attempt: 1 },
            ]
        );
        assert_eq!(mgr.next_deadline(), Some(now + DEFAULT_RECONNECT_DELAY));

        // Not yet due.
        assert!(mgr.poll_timers(now + Duration::from_secs(1)).is_empty());
        assert_eq!(mgr.state(), ConnectionState::Closed);

        let events = mgr.poll_timers(now + DEFAULT_RECONNECT_DELAY);
        assert_eq!(events, vec![ConnectionEvent::StateChanged(ConnectionState::Connecting)]);
        assert_eq!(mgr.transport.opened.len(), 2);
        assert!(mgr.pending_reconnect().is_none());
    }

    #[test]
    fn delay_does_not_grow_and_attempts_are_uncapped() {
        let mut now = Instant::now();
        let mut mgr = ConnectionManager::new(MockTransport::default());
        mgr.subscribe(subscription(Feed::CityChat, "R1"), now);

        for attempt in 1..=50 {
            let id = active(&mgr);
            let events = mgr.handle_event(
                id,
                TransportEvent::Closed { code: None, reason: "refused".into() },
                now,
            );
            assert!(events.contains(&ConnectionEvent::ReconnectScheduled {
                delay: DEFAULT_RECONNECT_DELAY,
                attempt,
            }));
            now += DEFAULT_RECONNECT_DELAY;
            mgr.poll_timers(now);
            assert_eq!(mgr.state(), ConnectionState::Connecting);
        }
        assert_eq!(mgr.transport.opened.len(), 51);
    }

    #[test]
    fn open_cancels_pending_reconnect_and_resets_attempts() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);
        mgr.handle_event(id, TransportEvent::Closed { code: None, reason: "x".into() }, now);
        mgr.poll_timers(now + DEFAULT_RECONNECT_DELAY);

        let id = active(&mgr);
        mgr.handle_event(id, TransportEvent::Opened, now + DEFAULT_RECONNECT_DELAY);
        assert!(mgr.pending_reconnect().is_none());
        assert_eq!(mgr.consecutive_failures, 0);
        // One join per open.
        assert_eq!(mgr.transport.sent.len(), 2);
    }

    #[test]
    fn scheduling_replaces_the_previous_timer() {
        let now = Instant::now();
        let mut mgr = ConnectionManager::new(MockTransport {
            open_error: Some("offline".into()),
            ..MockTransport::default()
        });
        mgr.subscribe(subscription(Feed::CityChat, "R1"), now);
        let first = mgr.pending_reconnect().expect("first timer");

        let later = now + Duration::from_secs(1);
        mgr.schedule_reconnect(later);
        let second = mgr.pending_reconnect().expect("second timer");
        assert_eq!(second.due, later + DEFAULT_RECONNECT_DELAY);
        assert_ne!(first.due, second.due);
        assert_eq!(mgr.next_deadline(), Some(second.due));
    }

    #[test]
    fn failed_open_surfaces_error_and_retries() {
        let now = Instant::now();
        let mut mgr = ConnectionManager::new(MockTransport {
            open_error: Some("no runtime".into()),
            ..MockTransport::default()
        });
        let events = mgr.subscribe(subscription(Feed::CityChat, "R1"), now);
        assert!(events.contains(&ConnectionEvent::Error {
            message: CONNECTION_ERROR_INDICATOR.into()
        }));
        assert_eq!(mgr.state(), ConnectionState::Closed);
        assert_eq!(mgr.last_error(), Some(CONNECTION_ERROR_INDICATOR));
        assert!(mgr.pending_reconnect().is_some());
    }

    #[test]
    fn unsubscribe_suppresses_reconnect() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);
        mgr.handle_event(id, TransportEvent::Closed { code: Some(1006), reason: "x".into() }, now);
        assert!(mgr.pending_reconnect().is_some());

        let events = mgr.unsubscribe();
        assert_eq!(events, vec![ConnectionEvent::StateChanged(ConnectionState::Idle)]);
        assert!(mgr.next_deadline().is_none());
        assert!(mgr.poll_timers(now + DEFAULT_RECONNECT_DELAY * 2).is_empty());
        assert_eq!(mgr.transport.opened.len(), 1);
    }

    #[test]
    fn unsubscribe_closes_with_clean_code_and_ignores_late_close() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::MeetupChat, "M1", now);
        let id = active(&mgr);

        mgr.unsubscribe();
        assert_eq!(mgr.transport.closed, vec![(id, CLEAN_CLOSE_CODE)]);

        // The transport echoes the close afterwards; it must not schedule anything.
        let events = mgr.handle_event(
            id,
            TransportEvent::Closed { code: Some(CLEAN_CLOSE_CODE), reason: "bye".into() },
            now,
        );
        assert!(events.is_empty());
        assert!(mgr.pending_reconnect().is_none());
        assert_eq!(mgr.state(), ConnectionState::Idle);
    }

    #[test]
    fn error_event_is_non_fatal() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);
        let events = mgr.handle_event(id, TransportEvent::Error("reset".into()), now);
        assert_eq!(
            events,
            vec![ConnectionEvent::Error { message: CONNECTION_ERROR_INDICATOR.into() }]
        );
        assert_eq!(mgr.state(), ConnectionState::Open);
    }

    // ── Incoming frames ─────────────────────────────────────────────

    #[test]
    fn message_frame_is_delivered_normalized() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);
        let frame = r#"{"type":"message","data":{"messageId":"m1","userId":"ayesha@example.com","userName":"Ayesha","message":"hi","createdAt":[1700000000,500000000]}}"#;

        let events = mgr.handle_event(id, TransportEvent::Text(frame.into()), now);
        let [ConnectionEvent::Delivered(Entry::Message(message))] = events.as_slice() else {
            panic!("expected one delivered message, got {events:?}");
        };
        assert_eq!(message.id, EntryId::from("m1"));
        assert_eq!(message.room_id, RoomId::from("R1"));
        assert_eq!(message.ownership, Ownership::Own);
        assert_eq!(message.created_at.millis(), Some(1_700_000_000_500));
    }

    #[test]
    fn incident_frame_is_delivered_on_incident_feed() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::Incidents, "incidents", now);
        let id = active(&mgr);
        let frame = r#"{"type":"new_incident","data":{"incidentId":"i1","incidentType":"traffic_jam","reportedAt":"2023-11-14T22:13:20Z"}}"#;

        let events = mgr.handle_event(id, TransportEvent::Text(frame.into()), now);
        assert!(matches!(
            events.as_slice(),
            [ConnectionEvent::Delivered(Entry::Incident(incident))] if incident.id == EntryId::from("i1")
        ));
    }

    #[test]
    fn unknown_malformed_and_foreign_frames_are_dropped() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);

        for frame in [
            r#"{"type":"typing","userId":"u"}"#,
            "{not json",
            r#"{"type":"message","data":{"messageId":"m1"}}"#,
            r#"{"type":"new_incident","data":{"incidentId":"i1","incidentType":"other"}}"#,
        ] {
            let events = mgr.handle_event(id, TransportEvent::Text(frame.into()), now);
            assert!(events.is_empty(), "frame should be dropped: {frame}");
            assert_eq!(mgr.state(), ConnectionState::Open);
        }
    }

    #[test]
    fn events_from_superseded_connection_are_ignored() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let old = active(&mgr);
        mgr.subscribe(subscription(Feed::CityChat, "R2"), now);

        let frame = r#"{"type":"message","data":{"messageId":"m9","message":"late"}}"#;
        assert!(mgr.handle_event(old, TransportEvent::Text(frame.into()), now).is_empty());
        assert!(mgr.handle_event(old, TransportEvent::Opened, now).is_empty());
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_fires_after_unsubscribe_on_the_clock() {
        let mut mgr = open_manager(Feed::CityChat, "R1", Instant::now());
        let id = active(&mgr);
        let closed = TransportEvent::Closed { code: Some(1006), reason: "x".into() };
        mgr.handle_event(id, closed, Instant::now());
        let due = mgr.next_deadline().expect("reconnect pending");

        tokio::time::advance(Duration::from_secs(1)).await;
        mgr.unsubscribe();
        tokio::time::sleep_until(due + DEFAULT_RECONNECT_DELAY).await;

        assert!(mgr.poll_timers(Instant::now()).is_empty());
        assert_eq!(mgr.transport.opened.len(), 1);
        assert_eq!(mgr.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_fires_once_the_delay_elapses_on_the_clock() {
        let mut mgr = open_manager(Feed::CityChat, "R1", Instant::now());
        let id = active(&mgr);
        let closed = TransportEvent::Closed { code: Some(1000), reason: "server restart".into() };
        mgr.handle_event(id, closed, Instant::now());

        tokio::time::advance(DEFAULT_RECONNECT_DELAY - Duration::from_millis(1)).await;
        assert!(mgr.poll_timers(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            mgr.poll_timers(Instant::now()),
            vec![ConnectionEvent::StateChanged(ConnectionState::Connecting)]
        );
        assert_eq!(mgr.transport.opened.len(), 2);
    }

    // ── Send ────────────────────────────────────────────────────────

    #[test]
    fn send_transmits_message_frame_when_open() {
        let mut mgr = open_manager(Feed::CityChat, "R1", Instant::now());
        mgr.send("  hello  ").expect("send should succeed");

        let frames = mgr.transport.sent_json();
        assert_eq!(frames.len(), 2); // join + message
        assert_eq!(
            frames[1],
            serde_json::json!({
                "type": "message",
                "roomId": "R1",
                "userId": "ayesha@example.com",
                "userName": "Ayesha",
                "message": "hello"
            })
        );
    }

    #[test]
    fn send_rejected_when_not_open_without_side_effects() {
        let now = Instant::now();
        let mut mgr = ConnectionManager::new(MockTransport::default());
        assert!(matches!(mgr.send("hi"), Err(SendError::NotOpen(ConnectionState::Idle))));

        mgr.subscribe(subscription(Feed::CityChat, "R1"), now);
        assert!(matches!(mgr.send("hi"), Err(SendError::NotOpen(ConnectionState::Connecting))));
        assert!(mgr.transport.sent.is_empty());
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    #[test]
    fn send_rejects_blank_messages() {
        let mut mgr = open_manager(Feed::CityChat, "R1", Instant::now());
        assert!(matches!(mgr.send("   "), Err(SendError::EmptyMessage)));
        assert_eq!(mgr.transport.sent.len(), 1);
    }

    #[test]
    fn failed_write_abandons_connection_then_reconnects() {
        let now = Instant::now();
        let mut mgr = open_manager(Feed::CityChat, "R1", now);
        let id = active(&mgr);
        mgr.transport.send_fails = true;

        assert!(matches!(mgr.send("hi"), Err(SendError::Transport(_))));
        assert_eq!(mgr.state(), ConnectionState::Closing);
        assert_eq!(mgr.transport.closed, vec![(id, BROKEN_CLOSE_CODE)]);
        assert!(mgr.connect(now).is_empty(), "no second connection while closing");

        mgr.handle_event(id, TransportEvent::Closed { code: None, reason: "aborted".into() }, now);
        assert_eq!(mgr.state(), ConnectionState::Closed);
        assert!(mgr.pending_reconnect().is_some());
    }
}
