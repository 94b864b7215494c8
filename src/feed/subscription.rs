//! The resilient subscription state machine.
//!
//! # State machine
//!
//! ```text
//!  (no base URL) ──► Disabled
//!
//!  spawn / visible ──► Connecting ──opened──► Connected
//!                          │                      │
//!                        failed                 failed / idle timeout
//!                          ▼                      │
//!                        Error ◄──────────────────┘
//!                          │
//!        attempt < max ────┼──── backoff timer ──► Connecting
//!        attempt ≥ max ────┴──► Polling (or stays Error under GiveUp)
//!
//!  Polling ──visible / reconnect()──► Connecting   (attempt reset to 0)
//!  any ──hidden──► Disconnected ──visible──► Connecting
//!  any ──dispose()──► Disconnected (terminal)
//! ```
//!
//! Each subscription runs in one Tokio task that owns the transport, the retry
//! timer, the polling interval, any in-flight poll fetch and the idle
//! watchdog. Every teardown path (hidden, scope change, dispose) drops all of
//! them before anything new is created, so at most one transport is ever
//! live and no stale timer can revive a connection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use livefeed::{FeedConfig, MemoryCache, ResilientSubscription};
//! use livefeed::topics::TopicMultiplexer;
//! use livefeed::types::Topic;
//!
//! # #[tokio::main]
//! # async fn main() -> livefeed::Result<()> {
//! let config = FeedConfig::new("https://api.example.com")?;
//! let cache = Arc::new(MemoryCache::new());
//! let topics = TopicMultiplexer::dedicated(
//!     Topic::snapshot("prices").poll_path("/prices"),
//!     None,
//! )?;
//!
//! let mut sub = ResilientSubscription::builder(config, topics, cache.clone()).spawn()?;
//! println!("{}", sub.state());
//!
//! // Unmount.
//! sub.dispose().await;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior, Sleep};
use url::Url;

use crate::backoff::BackoffState;
use crate::bus::EventBus;
use crate::cache::CacheSink;
use crate::client::FeedClient;
use crate::config::{ExhaustionPolicy, FeedConfig, PollingConfig, StreamConfig};
use crate::error::Result;
use crate::feed::polling::{PollOutcome, PollSource, PollTarget, poll_round};
use crate::stream::sse::SseConnector;
use crate::stream::{StreamConnection, StreamConnector, StreamSignal};
use crate::topics::{Inbound, TopicMultiplexer};
use crate::types::{ConnectionState, SubscriptionStatus};
use crate::visibility::Visibility;

/// Shortest polling interval accepted; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    SetScope(Option<String>),
    Reconnect,
    Dispose,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`ResilientSubscription`].
///
/// Only the configuration, the topic set and the cache are required; the
/// transport defaults to [`SseConnector`], polling to a [`FeedClient`] on the
/// configured base URL, and the event bus to a private one.
pub struct SubscriptionBuilder {
    config: FeedConfig,
    multiplexer: TopicMultiplexer,
    cache: Arc<dyn CacheSink>,
    connector: Option<Arc<dyn StreamConnector>>,
    poller: Option<Arc<dyn PollSource>>,
    bus: Option<EventBus>,
    visibility: Option<watch::Receiver<Visibility>>,
    label: Option<String>,
}

impl SubscriptionBuilder {
    /// Start building a subscription.
    pub fn new(
        config: FeedConfig,
        multiplexer: TopicMultiplexer,
        cache: Arc<dyn CacheSink>,
    ) -> Self {
        Self {
            config,
            multiplexer,
            cache,
            connector: None,
            poller: None,
            bus: None,
            visibility: None,
            label: None,
        }
    }

    /// Use a specific transport. Default: [`SseConnector`].
    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a specific poll source. Default: [`FeedClient`].
    pub fn poller(mut self, poller: Arc<dyn PollSource>) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Publish notifications on `bus`.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Follow a [`VisibilityController`](crate::visibility::VisibilityController).
    pub fn visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Name used in log fields. Default: the declared topic names.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Start the subscription.
    ///
    /// Without a configured base URL this returns a subscription that is
    /// permanently [`ConnectionState::Disabled`]: no task, no timers, no
    /// network. Must be called from within a Tokio runtime otherwise.
    pub fn spawn(self) -> Result<ResilientSubscription> {
        let scope = self.multiplexer.scope().map(str::to_owned);
        let label = self.label.unwrap_or_else(|| {
            self.multiplexer
                .declared()
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        });

        let Some(base_url) = self.config.base_url.clone() else {
            tracing::info!(feed = %label, "No endpoint configured, subscription disabled");
            let (_, status) =
                watch::channel(SubscriptionStatus::new(ConnectionState::Disabled, scope));
            return Ok(ResilientSubscription {
                status,
                commands: None,
                task: None,
            });
        };

        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(SseConnector::default()),
        };
        let poller = match self.poller {
            Some(poller) => poller,
            None => Arc::new(FeedClient::new(&self.config)?),
        };

        let (status_tx, status_rx) =
            watch::channel(SubscriptionStatus::new(ConnectionState::Connecting, scope));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut driver = Driver {
            label,
            base_url,
            multiplexer: self.multiplexer,
            backoff: BackoffState::new(&self.config.backoff),
            exhaustion: self.config.backoff.exhaustion,
            polling: self.config.polling,
            stream: self.config.stream,
            connector,
            poller,
            cache: self.cache,
            bus: self.bus.unwrap_or_default(),
            status: status_tx,
            commands: command_rx,
            visibility: self.visibility,
            hidden: false,
            connection: None,
            retry: None,
            poll_targets: Vec::new(),
            poll_interval: None,
            poll_fetch: None,
            idle: None,
        };
        driver.start();
        let task = tokio::spawn(driver.run());

        Ok(ResilientSubscription {
            status: status_rx,
            commands: Some(command_tx),
            task: Some(task),
        })
    }
}

// ---------------------------------------------------------------------------
// ResilientSubscription
// ---------------------------------------------------------------------------

/// Handle to one running subscription.
///
/// Dropping the handle aborts the task; [`dispose`](Self::dispose) is the
/// orderly, awaited teardown and should be preferred.
#[derive(Debug)]
pub struct ResilientSubscription {
    status: watch::Receiver<SubscriptionStatus>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl ResilientSubscription {
    /// Start a [`SubscriptionBuilder`].
    pub fn builder(
        config: FeedConfig,
        multiplexer: TopicMultiplexer,
        cache: Arc<dyn CacheSink>,
    ) -> SubscriptionBuilder {
        SubscriptionBuilder::new(config, multiplexer, cache)
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Receiver that observes every status transition.
    pub fn watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    /// Whether the background task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Rebind to another scope.
    ///
    /// Tears down the current transport and timers, clears every cache entry
    /// under the old scope, then opens a fresh stream for the new scope.
    /// `None` drops scoped topics.
    pub fn set_scope(&self, scope: Option<String>) {
        self.send(Command::SetScope(scope));
    }

    /// Reset the attempt counter and open a fresh stream, leaving polling if
    /// it was active. Ignored while hidden.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Tear the subscription down for good and wait for the task to finish.
    /// Idempotent.
    pub async fn dispose(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Dispose);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Subscription task panicked");
                }
            }
        }
    }

    fn send(&self, command: Command) {
        if let Some(commands) = &self.commands {
            if commands.send(command).is_err() {
                tracing::debug!("Subscription task already stopped");
            }
        }
    }
}

impl Drop for ResilientSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Driver (owned by the task)
// ---------------------------------------------------------------------------

struct Driver {
    label: String,
    base_url: Url,
    multiplexer: TopicMultiplexer,
    backoff: BackoffState,
    exhaustion: ExhaustionPolicy,
    polling: PollingConfig,
    stream: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    poller: Arc<dyn PollSource>,
    cache: Arc<dyn CacheSink>,
    bus: EventBus,
    status: watch::Sender<SubscriptionStatus>,
    commands: mpsc::UnboundedReceiver<Command>,
    visibility: Option<watch::Receiver<Visibility>>,
    hidden: bool,

    connection: Option<StreamConnection>,
    retry: Option<Pin<Box<Sleep>>>,
    poll_targets: Vec<PollTarget>,
    poll_interval: Option<Interval>,
    poll_fetch: Option<BoxFuture<'static, Vec<PollOutcome>>>,
    idle: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    /// Initial transition, before the task is spawned.
    fn start(&mut self) {
        if let Some(rx) = &mut self.visibility {
            self.hidden = *rx.borrow_and_update() == Visibility::Hidden;
        }
        if self.hidden {
            tracing::debug!(feed = %self.label, "Starting hidden, staying dormant");
            self.publish(ConnectionState::Disconnected);
        } else {
            self.connect();
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SetScope(scope)) => self.rescope(scope),
                    Some(Command::Reconnect) => self.on_reconnect(),
                    Some(Command::Dispose) | None => break,
                },
                visibility = next_visibility(&mut self.visibility) => match visibility {
                    Some(visibility) => self.on_visibility(visibility),
                    None => self.visibility = None,
                },
                signal = next_signal(&mut self.connection) => self.on_signal(signal),
                () = expire(&mut self.retry) => {
                    self.retry = None;
                    self.connect();
                }
                () = tick(&mut self.poll_interval) => self.on_poll_tick(),
                outcomes = settle(&mut self.poll_fetch) => {
                    self.poll_fetch = None;
                    self.on_poll_done(outcomes);
                }
                () = expire(&mut self.idle) => self.on_idle(),
            }
        }

        self.teardown();
        self.publish(ConnectionState::Disconnected);
        tracing::info!(feed = %self.label, "Subscription disposed");
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Open a fresh stream, replacing anything live.
    fn connect(&mut self) {
        self.teardown();

        if self.multiplexer.is_idle() {
            tracing::debug!(feed = %self.label, "No active topics, staying idle");
            self.publish(ConnectionState::Disconnected);
            return;
        }

        let url = match self.multiplexer.stream_url(&self.base_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(feed = %self.label, error = %e, "Cannot build stream URL");
                self.publish(ConnectionState::Error);
                return;
            }
        };

        tracing::info!(
            feed = %self.label,
            %url,
            attempt = self.backoff.attempt(),
            "Opening stream"
        );
        self.connection = Some(StreamConnection::open(self.connector.as_ref(), url));
        self.arm_idle();
        self.publish(ConnectionState::Connecting);
    }

    /// Drop the transport and every timer. Leaves the state untouched.
    fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if connection.close() {
                tracing::debug!(feed = %self.label, url = %connection.url(), "Closed stream");
            }
        }
        self.retry = None;
        self.poll_interval = None;
        self.poll_fetch = None;
        self.idle = None;
    }

    fn on_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Opened => {
                self.backoff.reset();
                self.arm_idle();
                tracing::info!(feed = %self.label, "Stream connected");
                self.publish(ConnectionState::Connected);
            }
            StreamSignal::Event { name, data } => {
                self.arm_idle();
                match self.multiplexer.decode(&name, &data) {
                    Inbound::Envelope(envelope) => {
                        let write =
                            self.multiplexer.apply(envelope, self.cache.as_ref(), &self.bus);
                        if write.is_changed() {
                            self.touch();
                        }
                    }
                    Inbound::Ignored => {
                        tracing::trace!(feed = %self.label, event = %name, "Ignored event");
                    }
                    Inbound::Malformed(e) => {
                        tracing::debug!(
                            feed = %self.label,
                            event = %name,
                            error = %e,
                            "Dropped malformed payload"
                        );
                    }
                }
            }
            StreamSignal::Failed(reason) => {
                // The connection released its handle before yielding this.
                self.connection = None;
                self.on_failure(&reason);
            }
        }
    }

    fn on_failure(&mut self, reason: &str) {
        self.teardown();
        match self.backoff.fail() {
            Some(delay) => {
                tracing::info!(
                    feed = %self.label,
                    attempt = self.backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "Stream failed, scheduling reconnect"
                );
                self.retry = Some(Box::pin(time::sleep(delay)));
                self.publish(ConnectionState::Error);
            }
            None => self.on_exhausted(reason),
        }
    }

    fn on_exhausted(&mut self, reason: &str) {
        if self.exhaustion == ExhaustionPolicy::FallbackToPolling {
            match self.multiplexer.poll_targets(&self.base_url) {
                Ok(targets) if !targets.is_empty() => {
                    self.start_polling(targets);
                    return;
                }
                Ok(_) => {
                    tracing::warn!(
                        feed = %self.label,
                        "No poll targets declared, cannot fall back"
                    );
                }
                Err(e) => {
                    tracing::warn!(feed = %self.label, error = %e, "Cannot build poll targets");
                }
            }
        }
        tracing::warn!(
            feed = %self.label,
            attempt = self.backoff.attempt(),
            %reason,
            "Stream retries exhausted, giving up"
        );
        self.publish(ConnectionState::Error);
    }

    fn start_polling(&mut self, targets: Vec<PollTarget>) {
        let mut interval = time::interval(self.polling.interval.max(MIN_POLL_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll_targets = targets;
        self.poll_interval = Some(interval);
        tracing::info!(
            feed = %self.label,
            attempt = self.backoff.attempt(),
            interval_ms = self.polling.interval.as_millis() as u64,
            targets = self.poll_targets.len(),
            "Stream retries exhausted, falling back to polling"
        );
        self.publish(ConnectionState::Polling);
    }

    fn on_poll_tick(&mut self) {
        if self.poll_fetch.is_some() {
            tracing::trace!(feed = %self.label, "Previous poll still in flight, skipping tick");
            return;
        }
        let round = poll_round(self.poller.clone(), self.poll_targets.clone());
        self.poll_fetch = Some(round.boxed());
    }

    fn on_poll_done(&mut self, outcomes: Vec<PollOutcome>) {
        let mut changed = false;
        for (topic, result) in outcomes {
            match result {
                Ok(payload) => {
                    let write = self.multiplexer.apply_polled(
                        &topic,
                        payload,
                        self.cache.as_ref(),
                        &self.bus,
                    );
                    changed |= write.is_changed();
                }
                Err(e) => {
                    tracing::debug!(
                        feed = %self.label,
                        %topic,
                        error = %e,
                        "Poll fetch failed, retrying next tick"
                    );
                }
            }
        }
        if changed {
            self.touch();
        }
    }

    fn on_idle(&mut self) {
        self.idle = None;
        tracing::warn!(feed = %self.label, "No data within idle timeout");
        self.on_failure("idle timeout");
    }

    fn on_visibility(&mut self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => {
                if !self.hidden {
                    self.hidden = true;
                    self.teardown();
                    tracing::info!(feed = %self.label, "Hidden, subscription suspended");
                    self.publish(ConnectionState::Disconnected);
                }
            }
            Visibility::Visible => {
                let was_hidden = std::mem::replace(&mut self.hidden, false);
                // A hide/show pair can coalesce into a single change; resume
                // anything that is not already streaming.
                let streaming = matches!(
                    self.state(),
                    ConnectionState::Connecting | ConnectionState::Connected
                );
                if was_hidden || !streaming {
                    tracing::info!(feed = %self.label, "Visible, reconnecting");
                    self.resume();
                }
            }
        }
    }

    fn on_reconnect(&mut self) {
        if self.hidden {
            tracing::debug!(feed = %self.label, "Ignoring reconnect while hidden");
            return;
        }
        self.resume();
    }

    fn resume(&mut self) {
        self.backoff.reset();
        self.connect();
    }

    fn rescope(&mut self, scope: Option<String>) {
        let next = match self.multiplexer.rescoped(scope) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(feed = %self.label, error = %e, "Rejected scope change");
                return;
            }
        };
        if next.scope() == self.multiplexer.scope() {
            return;
        }

        self.teardown();
        if let Some(old) = self.multiplexer.scope() {
            let cleared = self.cache.clear_scope(old);
            tracing::info!(feed = %self.label, scope = old, cleared, "Cleared previous scope");
        }
        self.multiplexer = next;
        self.backoff.reset();

        if self.hidden {
            self.publish(ConnectionState::Disconnected);
        } else {
            self.connect();
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn arm_idle(&mut self) {
        self.idle = self
            .stream
            .idle_timeout
            .map(|timeout| Box::pin(time::sleep(timeout)));
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn publish(&self, state: ConnectionState) {
        let attempt = self.backoff.attempt();
        let retry_pending = self.retry.is_some();
        let scope = self.multiplexer.scope();
        self.status.send_if_modified(|status| {
            let changed = status.state != state
                || status.attempt != attempt
                || status.retry_pending != retry_pending
                || status.scope.as_deref() != scope;
            status.state = state;
            status.attempt = attempt;
            status.retry_pending = retry_pending;
            status.scope = scope.map(str::to_owned);
            changed
        });
    }

    fn touch(&self) {
        let now = Utc::now();
        self.status.send_modify(|status| status.last_event_at = Some(now));
    }
}

// ---------------------------------------------------------------------------
// select! branch helpers: each is pending forever when its resource is absent
// ---------------------------------------------------------------------------

async fn next_signal(connection: &mut Option<StreamConnection>) -> StreamSignal {
    match connection {
        Some(connection) => match connection.next_signal().await {
            Some(signal) => signal,
            None => future::pending().await,
        },
        None => future::pending().await,
    }
}

async fn next_visibility(rx: &mut Option<watch::Receiver<Visibility>>) -> Option<Visibility> {
    let Some(rx) = rx else {
        return future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => Some(*rx.borrow_and_update()),
        Err(_) => None,
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn settle(fetch: &mut Option<BoxFuture<'static, Vec<PollOutcome>>>) -> Vec<PollOutcome> {
    match fetch {
        Some(fetch) => fetch.as_mut().await,
        None => future::pending().await,
    }
}
