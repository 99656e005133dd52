//! Single-session conversation controller.
//!
//! A [`ConversationController`] owns at most one live session with an external voice agent.
//! Any number of triggers (buttons, shortcuts) may ask for the session to start; the controller
//! makes sure only one connect attempt is ever in flight and reports progress through
//! [`SessionCallbacks`].
//!
//! ```text
//! disconnected ──request_start──► connecting ──ok──► connected
//!       ▲                             │                  │
//!       └──── error / timeout / end ──┘◄── end / remote ─┘
//! ```
//!
//! ## Callbacks
//!
//! Callbacks run one at a time on a dispatcher task, in the order the controller observed the
//! events. A panicking callback is caught and logged; the session state is unaffected.
//!
//! ## Runtime
//!
//! [`ConversationController::new`] and [`ConversationController::request_start`] spawn tasks and
//! must be called from inside a tokio runtime.

pub mod websocket;

pub use websocket::WebSocketTransport;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `end()` was called on a connected session.
    Requested,
    /// The agent closed the session, with its reason if it gave one.
    Remote(String),
    TransportLost,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("requested"),
            DisconnectReason::Remote(reason) if reason.is_empty() => f.write_str("remote closed"),
            DisconnectReason::Remote(reason) => write!(f, "remote closed: {reason}"),
            DisconnectReason::TransportLost => f.write_str("transport lost"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConversationError {
    /// True when the session never came up, i.e. the attempt ended in `disconnected`.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ConversationError::Connect(_) | ConversationError::ConnectTimeout(_)
        )
    }
}

// ============================================================================
// Transport boundary
// ============================================================================

/// External connect/disconnect primitives of a voice agent.
pub trait ConversationTransport: Send + Sync + 'static {
    type Connection: TransportConnection;

    /// Opens a session. Incoming traffic must be reported through `events`.
    fn connect(
        &self,
        events: TransportEvents,
    ) -> impl Future<Output = Result<Self::Connection, ConversationError>> + Send;
}

/// Handle to one established session.
pub trait TransportConnection: Send + 'static {
    fn disconnect(self) -> impl Future<Output = Result<(), ConversationError>> + Send;
}

enum TransportEvent {
    Message(String),
    Error(String),
    Closed(DisconnectReason),
}

trait EventSink: Send + Sync {
    fn deliver(&self, generation: u64, event: TransportEvent);
}

/// Sender handed to a transport for one connect attempt.
///
/// Events sent after the attempt was superseded (ended, timed out, or replaced) are dropped.
#[derive(Clone)]
pub struct TransportEvents {
    sink: Weak<dyn EventSink>,
    generation: u64,
}

impl TransportEvents {
    pub fn message(&self, text: impl Into<String>) {
        self.send(TransportEvent::Message(text.into()));
    }

    /// A non-fatal error; the session stays up.
    pub fn error(&self, message: impl Into<String>) {
        self.send(TransportEvent::Error(message.into()));
    }

    pub fn closed(&self, reason: DisconnectReason) {
        self.send(TransportEvent::Closed(reason));
    }

    fn send(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.upgrade() {
            sink.deliver(self.generation, event);
        }
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Callbacks
// ============================================================================

type Callback<A> = Box<dyn FnMut(A) + Send>;

/// Handlers for session events. Unset handlers are skipped.
#[derive(Default)]
pub struct SessionCallbacks {
    on_connect: Option<Callback<()>>,
    on_disconnect: Option<Callback<DisconnectReason>>,
    on_message: Option<Callback<String>>,
    on_error: Option<Callback<ConversationError>>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, mut f: impl FnMut() + Send + 'static) -> Self {
        self.on_connect = Some(Box::new(move |()| f()));
        self
    }

    pub fn on_disconnect(mut self, f: impl FnMut(DisconnectReason) + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn on_message(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(ConversationError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    fn invoke(&mut self, event: Dispatch) {
        match event {
            Dispatch::Connect => call(&mut self.on_connect, ()),
            Dispatch::Disconnect(reason) => call(&mut self.on_disconnect, reason),
            Dispatch::Message(text) => call(&mut self.on_message, text),
            Dispatch::Error(err) => call(&mut self.on_error, err),
        }
    }
}

fn call<A>(callback: &mut Option<Callback<A>>, arg: A) {
    if let Some(callback) = callback {
        callback(arg);
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

enum Dispatch {
    Connect,
    Disconnect(DisconnectReason),
    Message(String),
    Error(ConversationError),
}

impl Dispatch {
    fn name(&self) -> &'static str {
        match self {
            Dispatch::Connect => "on_connect",
            Dispatch::Disconnect(_) => "on_disconnect",
            Dispatch::Message(_) => "on_message",
            Dispatch::Error(_) => "on_error",
        }
    }
}

async fn run_dispatcher(mut events: mpsc::UnboundedReceiver<Dispatch>, mut callbacks: SessionCallbacks) {
    while let Some(event) = events.recv().await {
        let name = event.name();
        if panic::catch_unwind(AssertUnwindSafe(|| callbacks.invoke(event))).is_err() {
            tracing::error!(callback = name, "conversation callback panicked");
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

struct SessionState<C> {
    status: SessionStatus,
    /// Bumped whenever an attempt starts or a session ends; stale completions compare unequal.
    generation: u64,
    connection: Option<C>,
    /// A close the transport reported before the current attempt finished connecting.
    pending_close: Option<DisconnectReason>,
}

struct Inner<T: ConversationTransport> {
    transport: T,
    connect_timeout: Duration,
    state: Mutex<SessionState<T::Connection>>,
    status_tx: watch::Sender<SessionStatus>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
    triggers: Mutex<BTreeMap<u64, String>>,
    next_trigger: AtomicU64,
}

impl<T: ConversationTransport> Inner<T> {
    fn state(&self) -> MutexGuard<'_, SessionState<T::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn triggers(&self) -> MutexGuard<'_, BTreeMap<u64, String>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with the state lock held so status changes and callbacks stay in order.
    fn set_status(&self, state: &mut SessionState<T::Connection>, status: SessionStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
        tracing::info!(status = %status, generation = state.generation, "conversation status changed");
    }

    fn emit(&self, event: Dispatch) {
        // Fails only once the dispatcher is gone, i.e. during shutdown.
        let _ = self.dispatch.send(event);
    }

    fn finish_connect(&self, generation: u64, result: Result<T::Connection, ConversationError>) -> Option<T::Connection> {
        let mut state = self.state();
        let current = state.generation == generation && state.status == SessionStatus::Connecting;

        match result {
            Ok(connection) if current => {
                if let Some(reason) = state.pending_close.take() {
                    tracing::warn!(generation, reason = %reason, "conversation closed while connecting");
                    state.generation += 1;
                    self.set_status(&mut state, SessionStatus::Disconnected);
                    self.emit(Dispatch::Error(ConversationError::Connect(format!(
                        "closed during connect ({reason})"
                    ))));
                    return Some(connection);
                }
                state.connection = Some(connection);
                self.set_status(&mut state, SessionStatus::Connected);
                self.emit(Dispatch::Connect);
                None
            }
            Ok(connection) => {
                tracing::info!(generation, "connect completed after the attempt was abandoned");
                Some(connection)
            }
            Err(err) if current => {
                tracing::warn!(generation, "conversation connect failed: {}", err);
                state.pending_close = None;
                state.generation += 1;
                self.set_status(&mut state, SessionStatus::Disconnected);
                self.emit(Dispatch::Error(err));
                None
            }
            Err(err) => {
                tracing::debug!(generation, "abandoned connect attempt failed: {}", err);
                None
            }
        }
    }
}

impl<T: ConversationTransport> EventSink for Inner<T> {
    fn deliver(&self, generation: u64, event: TransportEvent) {
        let mut state = self.state();
        if state.generation != generation || state.status == SessionStatus::Disconnected {
            tracing::debug!(generation, "dropping event from a superseded session");
            return;
        }

        match event {
            TransportEvent::Message(text) => self.emit(Dispatch::Message(text)),
            TransportEvent::Error(message) => {
                self.emit(Dispatch::Error(ConversationError::Transport(message)))
            }
            // Settled by finish_connect once the attempt's result is known.
            TransportEvent::Closed(reason) if state.status == SessionStatus::Connecting => {
                tracing::debug!(reason = %reason, "conversation closed before connect completed");
                state.pending_close.get_or_insert(reason);
            }
            TransportEvent::Closed(reason) => {
                tracing::info!(reason = %reason, "conversation closed by transport");
                state.generation += 1;
                state.connection = None;
                self.set_status(&mut state, SessionStatus::Disconnected);
                self.emit(Dispatch::Disconnect(reason));
            }
        }
    }
}

/// Owner of the single conversation session. Cheap to clone; clones share the session.
pub struct ConversationController<T: ConversationTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: ConversationTransport> Clone for ConversationController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ConversationTransport> fmt::Debug for ConversationController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationController")
            .field("status", &self.status())
            .field("triggers", &self.trigger_count())
            .finish_non_exhaustive()
    }
}

impl<T: ConversationTransport> ConversationController<T> {
    pub fn new(transport: T, callbacks: SessionCallbacks, connect_timeout: Duration) -> Self {
        let (dispatch, events) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(events, callbacks));
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);

        Self {
            inner: Arc::new(Inner {
                transport,
                connect_timeout,
                state: Mutex::new(SessionState {
                    status: SessionStatus::Disconnected,
                    generation: 0,
                    connection: None,
                    pending_close: None,
                }),
                status_tx,
                dispatch,
                triggers: Mutex::new(BTreeMap::new()),
                next_trigger: AtomicU64::new(0),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state().status
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Asks for the session to start. Never fails; outcomes arrive through the callbacks.
    ///
    /// Ignored while a session is connecting or connected.
    pub fn request_start(&self) {
        let generation = {
            let mut state = self.inner.state();
            match state.status {
                SessionStatus::Connected => {
                    tracing::debug!("conversation already active");
                    return;
                }
                SessionStatus::Connecting => {
                    tracing::debug!("conversation connect already in progress");
                    return;
                }
                SessionStatus::Disconnected => {}
            }
            state.generation += 1;
            state.pending_close = None;
            self.inner.set_status(&mut state, SessionStatus::Connecting);
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let sink: Arc<dyn EventSink> = inner.clone();
            let events = TransportEvents {
                sink: Arc::downgrade(&sink),
                generation,
            };
            drop(sink);

            let timeout = inner.connect_timeout;
            let result = match tokio::time::timeout(timeout, inner.transport.connect(events)).await {
                Ok(result) => result,
                Err(_) => Err(ConversationError::ConnectTimeout(timeout)),
            };

            if let Some(stale) = inner.finish_connect(generation, result) {
                if let Err(e) = stale.disconnect().await {
                    tracing::warn!("failed to close abandoned connection: {}", e);
                }
            }
        });
    }

    /// Ends the session. Always legal; a no-op when already disconnected.
    ///
    /// A connected session fires `on_disconnect(Requested)` and is closed. A connect still in
    /// flight is abandoned and will be closed when it completes, without firing `on_connect`.
    pub async fn end(&self) {
        let connection = {
            let mut state = self.inner.state();
            let previous = state.status;
            if previous == SessionStatus::Disconnected {
                tracing::debug!("conversation already ended");
                return;
            }
            state.generation += 1;
            state.pending_close = None;
            self.inner.set_status(&mut state, SessionStatus::Disconnected);
            if previous == SessionStatus::Connected {
                self.inner.emit(Dispatch::Disconnect(DisconnectReason::Requested));
            } else {
                tracing::info!("abandoning conversation connect attempt");
            }
            state.connection.take()
        };

        if let Some(connection) = connection {
            if let Err(e) = connection.disconnect().await {
                tracing::error!("conversation disconnect error: {:?}", e);
                self.inner.emit(Dispatch::Error(e));
            }
        }
    }

    /// Registers a UI trigger. Dropping the handle unregisters it.
    pub fn register_trigger(&self, label: impl Into<String>) -> TriggerHandle<T> {
        let id = self.inner.next_trigger.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        tracing::debug!(trigger = %label, "trigger registered");
        self.inner.triggers().insert(id, label);
        TriggerHandle {
            id,
            controller: self.clone(),
        }
    }

    pub fn trigger_count(&self) -> usize {
        self.inner.triggers().len()
    }
}

/// A registered trigger. Unregisters itself on drop.
pub struct TriggerHandle<T: ConversationTransport> {
    id: u64,
    controller: ConversationController<T>,
}

impl<T: ConversationTransport> TriggerHandle<T> {
    pub fn activate(&self) {
        self.controller.request_start();
    }

    pub fn label(&self) -> String {
        self.controller
            .inner
            .triggers()
            .get(&self.id)
            .cloned()
            .unwrap_or_default()
    }
}

impl<T: ConversationTransport> Drop for TriggerHandle<T> {
    fn drop(&mut self) {
        if let Some(label) = self.controller.inner.triggers().remove(&self.id) {
            tracing::debug!(trigger = %label, "trigger released");
        }
    }
}

impl<T: ConversationTransport> fmt::Debug for TriggerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const TIMEOUT: Duration = Duration::from_secs(15);

    enum Mode {
        Succeed,
        Fail,
        Hang,
        /// Succeeds once the notify fires.
        Gated(Arc<Notify>),
        /// Reports a remote close, then succeeds.
        ClosedBeforeReady,
    }

    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        events: Mutex<Option<TransportEvents>>,
    }

    impl Recorder {
        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn disconnects(&self) -> usize {
            self.disconnects.load(Ordering::SeqCst)
        }

        fn events(&self) -> TransportEvents {
            self.events.lock().unwrap().clone().expect("connect was called")
        }
    }

    struct FakeTransport {
        recorder: Arc<Recorder>,
        mode: Mode,
    }

    struct FakeConnection {
        recorder: Arc<Recorder>,
    }

    impl ConversationTransport for FakeTransport {
        type Connection = FakeConnection;

        async fn connect(&self, events: TransportEvents) -> Result<FakeConnection, ConversationError> {
            self.recorder.connects.fetch_add(1, Ordering::SeqCst);
            *self.recorder.events.lock().unwrap() = Some(events.clone());
            match &self.mode {
                Mode::Succeed => {}
                Mode::ClosedBeforeReady => events.closed(DisconnectReason::Remote("bye".into())),
                Mode::Fail => return Err(ConversationError::Connect("refused".into())),
                Mode::Hang => std::future::pending::<()>().await,
                Mode::Gated(gate) => gate.notified().await,
            }
            Ok(FakeConnection {
                recorder: self.recorder.clone(),
            })
        }
    }

    impl TransportConnection for FakeConnection {
        async fn disconnect(self) -> Result<(), ConversationError> {
            self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    type Log = mpsc::UnboundedReceiver<String>;

    fn recording_callbacks() -> (SessionCallbacks, Log) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (c, d, m, e) = (tx.clone(), tx.clone(), tx.clone(), tx);
        let callbacks = SessionCallbacks::new()
            .on_connect(move || {
                let _ = c.send("connect".to_owned());
            })
            .on_disconnect(move |reason| {
                let _ = d.send(format!("disconnect: {reason}"));
            })
            .on_message(move |text| {
                let _ = m.send(format!("message: {text}"));
            })
            .on_error(move |err| {
                let _ = e.send(format!("error: {err}"));
            });
        (callbacks, rx)
    }

    fn controller(mode: Mode) -> (ConversationController<FakeTransport>, Arc<Recorder>, Log) {
        let recorder = Arc::new(Recorder::default());
        let (callbacks, log) = recording_callbacks();
        let transport = FakeTransport {
            recorder: recorder.clone(),
            mode,
        };
        (ConversationController::new(transport, callbacks, TIMEOUT), recorder, log)
    }

    /// Lets spawned tasks run until they block.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn wait_for(controller: &ConversationController<FakeTransport>, status: SessionStatus) {
        controller
            .subscribe()
            .wait_for(|s| *s == status)
            .await
            .expect("controller alive");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_while_connecting_connects_once() {
        let gate = Arc::new(Notify::new());
        let (controller, recorder, mut log) = controller(Mode::Gated(gate.clone()));

        controller.request_start();
        controller.request_start();
        assert_eq!(controller.status(), SessionStatus::Connecting);
        settle().await;
        assert_eq!(recorder.connects(), 1);

        gate.notify_one();
        wait_for(&controller, SessionStatus::Connected).await;
        assert_eq!(log.recv().await.unwrap(), "connect");

        controller.request_start();
        settle().await;
        assert_eq!(recorder.connects(), 1);
        assert!(log.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn two_triggers_share_one_session() {
        let (controller, recorder, mut log) = controller(Mode::Succeed);
        let header = controller.register_trigger("header button");
        let footer = controller.register_trigger("footer button");
        assert_eq!(controller.trigger_count(), 2);

        header.activate();
        footer.activate();
        wait_for(&controller, SessionStatus::Connected).await;
        settle().await;

        assert_eq!(recorder.connects(), 1);
        assert_eq!(log.recv().await.unwrap(), "connect");
        assert!(log.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_reports_error_and_allows_retry() {
        let (controller, recorder, mut log) = controller(Mode::Fail);

        controller.request_start();
        assert_eq!(log.recv().await.unwrap(), "error: connect failed: refused");
        assert_eq!(controller.status(), SessionStatus::Disconnected);

        controller.request_start();
        assert_eq!(log.recv().await.unwrap(), "error: connect failed: refused");
        assert_eq!(recorder.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_reverts_to_disconnected() {
        let (controller, _, mut log) = controller(Mode::Hang);

        controller.request_start();
        assert_eq!(log.recv().await.unwrap(), "error: connect timed out after 15s");
        assert_eq!(controller.status(), SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn end_while_connecting_discards_late_connection() {
        let gate = Arc::new(Notify::new());
        let (controller, recorder, mut log) = controller(Mode::Gated(gate.clone()));

        controller.request_start();
        settle().await;
        controller.end().await;
        assert_eq!(controller.status(), SessionStatus::Disconnected);

        gate.notify_one();
        settle().await;
        assert_eq!(recorder.disconnects(), 1);
        assert_eq!(controller.status(), SessionStatus::Disconnected);
        assert!(log.try_recv().is_err(), "no on_connect for an abandoned attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn end_from_connected_fires_requested_disconnect() {
        let (controller, recorder, mut log) = controller(Mode::Succeed);
        controller.request_start();
        assert_eq!(log.recv().await.unwrap(), "connect");

        controller.end().await;
        assert_eq!(log.recv().await.unwrap(), "disconnect: requested");
        assert_eq!(recorder.disconnects(), 1);

        // Already disconnected: nothing happens.
        controller.end().await;
        settle().await;
        assert_eq!(recorder.disconnects(), 1);
        assert!(log.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_fires_disconnect_once() {
        let (controller, _, mut log) = controller(Mode::Succeed);
        controller.request_start();
        assert_eq!(log.recv().await.unwrap(), "connect");

        let events = transport_events(&controller);
        events.message("hello");
        events.closed(DisconnectReason::Remote("agent hung up".into()));
        events.closed(DisconnectReason::TransportLost);
        events.message("too late");

        assert_eq!(log.recv().await.unwrap(), "message: hello");
        assert_eq!(log.recv().await.unwrap(), "disconnect: remote closed: agent hung up");
        settle().await;
        assert!(log.try_recv().is_err());
        assert_eq!(controller.status(), SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_connect_completes_reverts_and_allows_retry() {
        let (controller, recorder, mut log) = controller(Mode::ClosedBeforeReady);

        controller.request_start();
        assert_eq!(
            log.recv().await.unwrap(),
            "error: connect failed: closed during connect (remote closed: bye)"
        );
        settle().await;
        assert_eq!(controller.status(), SessionStatus::Disconnected);
        assert_eq!(recorder.disconnects(), 1, "the already-closed connection is released");
        assert!(log.try_recv().is_err(), "no on_connect for a closed attempt");

        controller.request_start();
        assert!(log.recv().await.unwrap().starts_with("error: connect failed"));
        assert_eq!(recorder.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_keep_the_session_up() {
        let (controller, _, mut log) = controller(Mode::Succeed);
        controller.request_start();
        assert_eq!(log.recv().await.unwrap(), "connect");

        transport_events(&controller).error("audio glitch");
        assert_eq!(log.recv().await.unwrap(), "error: transport error: audio glitch");
        assert_eq!(controller.status(), SessionStatus::Connected);

        assert!(!ConversationError::Transport("audio glitch".into()).is_connect_failure());
        assert!(!ConversationError::Disconnect("reset".into()).is_connect_failure());
        assert!(ConversationError::Connect("refused".into()).is_connect_failure());
        assert!(ConversationError::ConnectTimeout(TIMEOUT).is_connect_failure());
    }

    fn transport_events(controller: &ConversationController<FakeTransport>) -> TransportEvents {
        controller.inner.transport.recorder.events()
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_break_session() {
        let recorder = Arc::new(Recorder::default());
        let (tx, mut log) = mpsc::unbounded_channel();
        let callbacks = SessionCallbacks::new()
            .on_connect(|| panic!("boom"))
            .on_message(move |text| {
                let _ = tx.send(text);
            });
        let controller = ConversationController::new(
            FakeTransport {
                recorder: recorder.clone(),
                mode: Mode::Succeed,
            },
            callbacks,
            TIMEOUT,
        );

        controller.request_start();
        wait_for(&controller, SessionStatus::Connected).await;
        recorder.events().message("still here");

        assert_eq!(log.recv().await.unwrap(), "still here");
        assert_eq!(controller.status(), SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_unregister_on_drop() {
        let (controller, _, _log) = controller(Mode::Succeed);
        let first = controller.register_trigger("hero");
        {
            let second = controller.register_trigger("chat bubble");
            assert_eq!(second.label(), "chat bubble");
            assert_eq!(controller.trigger_count(), 2);
        }
        assert_eq!(controller.trigger_count(), 1);
        drop(first);
        assert_eq!(controller.trigger_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_status_changes() {
        let (controller, _, _log) = controller(Mode::Succeed);
        let mut status = controller.subscribe();
        assert_eq!(*status.borrow(), SessionStatus::Disconnected);

        controller.request_start();
        status.wait_for(|s| *s == SessionStatus::Connected).await.unwrap();
        controller.end().await;
        assert_eq!(*status.borrow_and_update(), SessionStatus::Disconnected);
    }
}
