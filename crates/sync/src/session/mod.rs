// Room session: one driver task per mounted view.
//
// The driver owns the connection manager, the timeline and the history
// fetch for the current room. It serializes everything through a single
// `select!` loop and publishes a `ViewState` snapshot after each change.

use std::time::Duration;

use nomad_common::identity::{resolve_identity, GuestId, SessionProfile};
use nomad_common::types::{Entry, Feed, LocalIdentity, RoomId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConfigError, SyncConfig};
use crate::connection::ws::{TransportEvents, WsTransport};
use crate::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, RoomSubscription, SendError,
};
use crate::history::{HistoryClient, HistoryRequest};
use crate::merge::Timeline;

/// What the view renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub feed: Feed,
    pub room_id: Option<RoomId>,
    pub identity: LocalIdentity,
    pub connection: ConnectionState,
    pub entries: Vec<Entry>,
    pub history_loading: bool,
    pub connection_error: Option<String>,
}

impl ViewState {
    /// State of a freshly mounted view: the room is known and history is
    /// still loading, so waiters on `history_loading` block until it lands.
    fn mounted(feed: Feed, room_id: RoomId, identity: LocalIdentity) -> Self {
        Self {
            feed,
            room_id: Some(room_id),
            identity,
            connection: ConnectionState::Idle,
            entries: Vec::new(),
            history_loading: true,
            connection_error: None,
        }
    }

    /// The composer is enabled only while the live channel is open.
    pub fn can_send(&self) -> bool {
        self.connection == ConnectionState::Open
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("room sessions must be mounted inside a tokio runtime")]
    NoRuntime,
}

enum Command {
    Send { text: String, reply: oneshot::Sender<Result<(), SendError>> },
    ChangeRoom(RoomId),
    Unmount { done: oneshot::Sender<()> },
}

/// Handle to a mounted room view. Dropping it unmounts the view.
pub struct RoomSession {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ViewState>,
    task: Option<JoinHandle<()>>,
}

impl RoomSession {
    /// Mount a view of `room_id` on `feed`: resolve the identity, start the
    /// history fetch and open the live channel.
    pub fn mount(
        config: &SyncConfig,
        feed: Feed,
        room_id: RoomId,
        profile: Option<SessionProfile>,
    ) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let endpoint = config.endpoint(feed)?;
        let history = HistoryClient::new(config.api_base()?);

        let guest_id = GuestId::generate();
        let identity = resolve_identity(profile.as_ref(), &config.guest_label, &guest_id);
        info!(%feed, %room_id, user_id = %identity.id, "mounting room view");

        let (driver, view_rx) = SessionDriver::new(
            feed,
            room_id.clone(),
            endpoint,
            identity,
            profile.and_then(|p| p.access_token),
            history,
            config.reconnect_delay(),
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(driver.run(room_id, commands_rx));

        Ok(Self { commands: commands_tx, view: view_rx, task: Some(task) })
    }

    /// Send a chat message. Rejected unless the live channel is open.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SendError> {
        let (reply, response) = oneshot::channel();
        let command = Command::Send { text: text.into(), reply };
        if self.commands.send(command).is_err() {
            return Err(SendError::NotOpen(ConnectionState::Idle));
        }
        response.await.unwrap_or(Err(SendError::NotOpen(ConnectionState::Idle)))
    }

    /// Switch the view to another room, tearing the current one down.
    pub fn change_room(&self, room_id: RoomId) {
        let _ = self.commands.send(Command::ChangeRoom(room_id));
    }

    /// Latest published state.
    pub fn state(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe_view(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    /// Tear the view down and wait until the socket and timer are released.
    pub async fn unmount(mut self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Unmount { done }).is_ok() {
            let _ = finished.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ── Driver ──────────────────────────────────────────────────────────

struct HistoryBatch {
    generation: u64,
    entries: Vec<Entry>,
}

struct SessionDriver {
    feed: Feed,
    endpoint: Url,
    identity: LocalIdentity,
    access_token: Option<String>,
    manager: ConnectionManager<WsTransport>,
    transport_events: TransportEvents,
    history: HistoryClient,
    history_tx: mpsc::UnboundedSender<HistoryBatch>,
    history_rx: mpsc::UnboundedReceiver<HistoryBatch>,
    /// Bumped on every room change; results from older fetches are dropped.
    history_generation: u64,
    history_task: Option<JoinHandle<()>>,
    timeline: Timeline<Entry>,
    view: watch::Sender<ViewState>,
}

impl SessionDriver {
    fn new(
        feed: Feed,
        room_id: RoomId,
        endpoint: Url,
        identity: LocalIdentity,
        access_token: Option<String>,
        history: HistoryClient,
        reconnect_delay: Duration,
    ) -> (Self, watch::Receiver<ViewState>) {
        let (transport, transport_events) = WsTransport::new();
        let manager = ConnectionManager::new(transport).with_reconnect_delay(reconnect_delay);
        let (view_tx, view_rx) =
            watch::channel(ViewState::mounted(feed, room_id, identity.clone()));
        let (history_tx, history_rx) = mpsc::unbounded_channel();

        let driver = Self {
            feed,
            endpoint,
            identity,
            access_token,
            manager,
            transport_events,
            history,
            history_tx,
            history_rx,
            history_generation: 0,
            history_task: None,
            timeline: Timeline::new(),
            view: view_tx,
        };
        (driver, view_rx)
    }

    async fn run(mut self, room_id: RoomId, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.start_room(room_id);

        loop {
            let deadline = self.manager.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send { text, reply }) => {
                        let result = self.manager.send(&text);
                        if let Err(error) = &result {
                            debug!(%error, "send rejected");
                        }
                        let _ = reply.send(result);
                        self.publish();
                    }
                    Some(Command::ChangeRoom(room_id)) => {
                        self.stop_room();
                        self.start_room(room_id);
                    }
                    Some(Command::Unmount { done }) => {
                        self.stop_room();
                        self.detach();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.stop_room();
                        self.detach();
                        break;
                    }
                },
                Some((connection, event)) = self.transport_events.recv() => {
                    let events = self.manager.handle_event(connection, event, Instant::now());
                    self.apply(events);
                }
                Some(batch) = self.history_rx.recv() => self.seed_history(batch),
                _ = sleep_until(wake_at), if deadline.is_some() => {
                    let events = self.manager.poll_timers(Instant::now());
                    self.apply(events);
                }
            }
        }
        info!(feed = %self.feed, "room view unmounted");
    }

    fn start_room(&mut self, room_id: RoomId) {
        self.timeline.clear();
        self.history_generation += 1;
        let generation = self.history_generation;

        let request = HistoryRequest {
            feed: self.feed,
            room_id: room_id.clone(),
            identity: self.identity.clone(),
            access_token: self.access_token.clone(),
        };
        let client = self.history.clone();
        let results = self.history_tx.clone();
        self.history_task = Some(tokio::spawn(async move {
            let entries = client.fetch(&request).await;
            let _ = results.send(HistoryBatch { generation, entries });
        }));

        let subscription = RoomSubscription {
            feed: self.feed,
            room_id: room_id.clone(),
            identity: self.identity.clone(),
            endpoint: self.endpoint.clone(),
        };
        let events = self.manager.subscribe(subscription, Instant::now());

        self.view.send_modify(|view| {
            view.room_id = Some(room_id);
            view.history_loading = true;
            view.connection_error = None;
        });
        self.apply(events);
    }

    fn stop_room(&mut self) {
        self.history_generation += 1;
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
        let events = self.manager.unsubscribe();
        self.timeline.clear();
        self.apply(events);
    }

    /// Final state once no room is mounted any more.
    fn detach(&self) {
        self.view.send_modify(|view| {
            view.room_id = None;
            view.history_loading = false;
        });
    }

    fn seed_history(&mut self, batch: HistoryBatch) {
        if batch.generation != self.history_generation {
            debug!(generation = batch.generation, "ignoring history for a previous room");
            return;
        }
        self.history_task = None;
        let added = self.timeline.seed(batch.entries);
        debug!(added, total = self.timeline.len(), "history merged");
        self.view.send_modify(|view| view.history_loading = false);
        self.publish();
    }

    fn apply(&mut self, events: Vec<ConnectionEvent>) {
        for event in events {
            match event {
                ConnectionEvent::Delivered(entry) => {
                    let id = entry.id().clone();
                    if !self.timeline.insert(entry) {
                        debug!(%id, "dropping duplicate live entry");
                    }
                }
                ConnectionEvent::StateChanged(ConnectionState::Open) => {
                    self.view.send_modify(|view| view.connection_error = None);
                }
                ConnectionEvent::StateChanged(_) => {}
                ConnectionEvent::Error { message } => {
                    self.view.send_modify(|view| view.connection_error = Some(message));
                }
                ConnectionEvent::ReconnectScheduled { delay, attempt } => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "live channel lost, retrying");
                }
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let connection = self.manager.state();
        let entries = self.timeline.entries();
        self.view.send_if_modified(|view| {
            let changed = view.connection != connection || view.entries.as_slice() != entries;
            if changed {
                view.connection = connection;
                view.entries = entries.to_vec();
            }
            changed
        });
    }
}
