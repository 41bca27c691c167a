use std::future::pending;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use crate::error::{CoreError, RemoteError};
use crate::events::{CoreEvent, EnvSignal};
use crate::models::{ChangeEvent, ChannelStatus};
use crate::remote::{ChannelFilter, ChannelHandle, ChannelMessage, RemoteStore};
use crate::stats::SharedEventStats;
use crate::store::SharedRegistry;

/// Lifecycle of the change channel as seen by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Subscribed,
    Closed,
}

/// Commands accepted by a running [`SubscriptionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Subscribe,
    Environment(EnvSignal),
    Shutdown,
}

/// Owns the single change channel, routes its events into the table caches
/// and reopens it with exponential backoff when it closes.
pub struct SubscriptionManager {
    store: Rc<dyn RemoteStore>,
    registry: SharedRegistry,
    filter: ChannelFilter,
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    channel: Option<ChannelHandle>,
    /// The current channel already reported `Closed`
    channel_closed: bool,
    reconnect_at: Option<Instant>,
    stats: SharedEventStats,
    events: Option<mpsc::UnboundedSender<CoreEvent>>,
    verbose: bool,
}

impl SubscriptionManager {
    pub fn new(
        store: Rc<dyn RemoteStore>,
        registry: SharedRegistry,
        filter: ChannelFilter,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            filter,
            policy,
            state: ConnectionState::Idle,
            attempts: 0,
            channel: None,
            channel_closed: false,
            reconnect_at: None,
            stats: SharedEventStats::new(),
            events: None,
            verbose: false,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<CoreEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_stats(mut self, stats: SharedEventStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the armed reconnect timer fires, if one is armed.
    pub fn pending_reconnect(&self) -> Option<Instant> {
        self.reconnect_at
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(CoreEvent::ConnectionChanged(state));
        }
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            debug!("Pending reconnect cancelled");
        }
    }

    /// Replace the current channel with a freshly opened one.
    ///
    /// A failed open is handled like a closed channel: it arms the backoff
    /// timer instead of returning an error.
    pub async fn subscribe(&mut self) {
        let open = self.begin_open();
        let result = open.await;
        self.finish_open(result);
    }

    /// Tear down the current channel and start opening a new one. The open
    /// holds no borrow of the manager, so the run loop can drop it unfinished.
    fn begin_open(&mut self) -> PendingOpen {
        if let Some(channel) = self.channel.take() {
            if self.state != ConnectionState::Closed {
                channel.unsubscribe();
            }
        }
        self.cancel_reconnect();
        self.channel_closed = false;
        self.set_state(ConnectionState::Connecting);
        self.stats.record_channel_open();

        let store = self.store.clone();
        let filter = self.filter.clone();
        Box::pin(async move { store.open_change_channel(&filter).await })
    }

    fn finish_open(&mut self, result: Result<ChannelHandle, RemoteError>) {
        match result {
            Ok(channel) => {
                info!("Change channel '{}' opened", self.filter.name);
                self.channel = Some(channel);
            }
            Err(e) => {
                warn!("{}", CoreError::ChannelOpenFailed { source: e });
                self.set_state(ConnectionState::Closed);
                self.reconnect_with_backoff();
            }
        }
    }

    pub fn handle_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Status(status) => self.handle_status(status),
            ChannelMessage::Change(event) => self.apply_change(event),
        }
    }

    pub fn handle_status(&mut self, status: ChannelStatus) {
        match status {
            ChannelStatus::Connecting => self.set_state(ConnectionState::Connecting),
            ChannelStatus::Subscribed => {
                self.attempts = 0;
                self.cancel_reconnect();
                self.set_state(ConnectionState::Subscribed);
                info!("Subscribed to realtime changes");
            }
            ChannelStatus::Closed => {
                self.channel_closed = true;
                self.set_state(ConnectionState::Closed);
                self.reconnect_with_backoff();
            }
            ChannelStatus::Error => {
                warn!("Change channel reported an error");
                if self.state == ConnectionState::Subscribed {
                    self.set_state(ConnectionState::Closed);
                }
            }
        }
    }

    /// Route one pushed change into its table's cache.
    pub fn apply_change(&mut self, event: ChangeEvent) {
        if self.verbose {
            info!(
                "Received {} event on table '{}': {:?}",
                event.kind, event.table, event.new_row
            );
        }
        let applied = self.registry.borrow_mut().apply_change(&event);
        match applied {
            Some(id) => {
                debug!("{} {} {}", event.table, event.kind, id);
                self.stats.record(&event.table, event.kind);
                self.emit(CoreEvent::RowChanged {
                    table: event.table,
                    kind: event.kind,
                    id,
                });
            }
            None => warn!(
                "Dropping {} event on '{}' without a row id",
                event.kind, event.table
            ),
        }
    }

    /// Arm the reconnect timer for the current attempt count, replacing any
    /// armed one. Does nothing once the attempt ceiling is reached.
    pub fn reconnect_with_backoff(&mut self) {
        self.cancel_reconnect();
        if self.policy.exhausted(self.attempts) {
            warn!(
                "Giving up automatic reconnects after {} attempts, waiting for visibility or network change",
                self.attempts
            );
            return;
        }
        let delay = self.policy.delay_for(self.attempts);
        info!("Reconnecting in {:?} (attempt {})", delay, self.attempts + 1);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    /// The reconnect timer elapsed.
    pub async fn fire_reconnect(&mut self) {
        self.count_reconnect();
        self.subscribe().await;
    }

    fn count_reconnect(&mut self) {
        self.reconnect_at = None;
        self.attempts += 1;
    }

    pub async fn handle_environment(&mut self, signal: EnvSignal) {
        if self.wants_reconnect(signal) {
            self.subscribe().await;
        }
    }

    /// Whether `signal` should reopen the channel right away. Resets the
    /// attempt counter when it does.
    fn wants_reconnect(&mut self, signal: EnvSignal) -> bool {
        match signal {
            EnvSignal::Visible | EnvSignal::Online
                if self.state != ConnectionState::Subscribed =>
            {
                info!("{:?} while {:?}, reconnecting now", signal, self.state);
                self.attempts = 0;
                true
            }
            EnvSignal::Offline => {
                info!("Network went offline");
                false
            }
            _ => {
                debug!("Ignoring {:?} while {:?}", signal, self.state);
                false
            }
        }
    }

    /// The channel's message stream ended.
    fn channel_ended(&mut self) {
        self.channel = None;
        if !self.channel_closed {
            warn!("{}", CoreError::ChannelClosedUnexpectedly);
            self.handle_status(ChannelStatus::Closed);
        }
    }

    /// Handle every message already queued on the channel. Returns how many
    /// were handled.
    pub fn drain_channel(&mut self) -> usize {
        let mut handled = 0;
        while let Some(channel) = self.channel.as_mut() {
            match channel.try_recv() {
                Ok(message) => {
                    self.handle_message(message);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.channel_ended();
                    break;
                }
            }
        }
        handled
    }

    pub fn shutdown(&mut self) {
        self.cancel_reconnect();
        if let Some(channel) = self.channel.take() {
            channel.unsubscribe();
        }
        self.set_state(ConnectionState::Idle);
    }

    /// Serve commands, channel messages and the reconnect timer until shutdown.
    ///
    /// A channel open in progress is one more branch of the loop: commands
    /// keep being served while it is pending, and a newer open or a shutdown
    /// drops it.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SyncCommand>) {
        let mut opening: Option<PendingOpen> = None;
        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SyncCommand::Subscribe) => opening = Some(self.begin_open()),
                    Some(SyncCommand::Environment(signal)) => {
                        if self.wants_reconnect(signal) {
                            opening = Some(self.begin_open());
                        }
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                },
                result = wait_open(&mut opening) => {
                    opening = None;
                    self.finish_open(result);
                }
                message = next_message(&mut self.channel) => match message {
                    Some(message) => self.handle_message(message),
                    None => self.channel_ended(),
                },
                _ = wait_until(reconnect_at) => {
                    self.count_reconnect();
                    opening = Some(self.begin_open());
                }
            }
        }
        if opening.take().is_some() {
            debug!("Abandoning channel open in progress");
        }
        self.shutdown();
        debug!("Subscription manager stopped");
    }
}

type PendingOpen = LocalBoxFuture<'static, Result<ChannelHandle, RemoteError>>;

async fn wait_open(opening: &mut Option<PendingOpen>) -> Result<ChannelHandle, RemoteError> {
    match opening {
        Some(open) => open.await,
        None => pending().await,
    }
}

async fn next_message(channel: &mut Option<ChannelHandle>) -> Option<ChannelMessage> {
    match channel {
        Some(channel) => channel.recv().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
