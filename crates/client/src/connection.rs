//! Connection manager. Keeps the notification channel alive while a session
//! is active.
//!
//! One reader task per channel drives open/message/error/close handling.
//! Every channel and every `disconnect()` bumps a generation counter; callbacks
//! and retry timers carrying an older generation are ignored, so a timer that
//! fires after logout can never reopen the channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use toolhub_protocol::server::duration_ms;
use toolhub_protocol::{Lenient, ServerMessage, Severity};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::notifications::NotificationStore;
use crate::session::SessionProvider;
use crate::transport::{Channel, ChannelEvent, Connector};

pub const RECONNECT_EXHAUSTED_MESSAGE: &str =
    "Real-time notifications are unavailable. Refresh to reconnect.";

/// Coarse view of the channel for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Retrying,
}

struct SocketHandle {
    generation: u64,
    open: bool,
    shutdown: oneshot::Sender<()>,
}

#[derive(Default)]
struct LinkState {
    socket: Option<SocketHandle>,
    reconnect_attempts: u32,
    pending_retry: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared<C> {
    connector: C,
    endpoint: String,
    policy: ReconnectPolicy,
    push_duration_ms: u64,
    session: SessionProvider,
    store: NotificationStore,
    link: Mutex<LinkState>,
}

/// Handle to the connection manager (cheap to Clone).
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Step {
    Event(Option<ChannelEvent>),
    Shutdown,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        config: &ClientConfig,
        session: SessionProvider,
        store: NotificationStore,
    ) -> Self {
        let push_duration_ms = u64::try_from(config.push_duration.as_millis()).unwrap_or(u64::MAX);
        Self {
            shared: Arc::new(Shared {
                connector,
                endpoint: config.ws_url.clone(),
                policy: config.reconnect.clone(),
                push_duration_ms,
                session,
                store,
                link: Mutex::new(LinkState::default()),
            }),
        }
    }

    /// Open the channel if a session is active and none is open yet.
    pub fn connect(&self) {
        let Some(token) = self.shared.session.token() else {
            debug!(
                component = "connection",
                event = "ws.connect.skipped",
                "No active session"
            );
            return;
        };

        let mut link = self.lock();
        if link.socket.is_some() {
            return;
        }
        if let Some(retry) = link.pending_retry.take() {
            retry.abort();
        }
        self.open_channel(&mut link, token);
    }

    /// Close the channel and cancel any pending retry. Never schedules a
    /// reconnect.
    pub fn disconnect(&self) {
        let mut link = self.lock();
        link.generation += 1;
        link.reconnect_attempts = 0;
        let had_retry = match link.pending_retry.take() {
            Some(retry) => {
                retry.abort();
                true
            }
            None => false,
        };
        let had_socket = match link.socket.take() {
            Some(socket) => {
                let _ = socket.shutdown.send(());
                true
            }
            None => false,
        };

        if had_retry || had_socket {
            info!(
                component = "connection",
                event = "ws.disconnected",
                had_socket,
                had_retry,
                "Notification channel shut down"
            );
        }
    }

    /// Follow the session provider: connect when a session appears,
    /// disconnect when it ends, and reconnect when the token changes.
    pub fn bind_session(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut sessions = self.shared.session.subscribe();

        tokio::spawn(async move {
            let mut current = sessions
                .borrow_and_update()
                .as_ref()
                .map(|s| s.token.clone());
            if current.is_some() {
                manager.connect();
            }

            while sessions.changed().await.is_ok() {
                let next = sessions
                    .borrow_and_update()
                    .as_ref()
                    .map(|s| s.token.clone());
                match (&current, &next) {
                    (_, None) => manager.disconnect(),
                    (Some(prev), Some(token)) if prev == token => {}
                    (_, Some(_)) => {
                        manager.disconnect();
                        manager.connect();
                    }
                }
                current = next;
            }

            manager.disconnect();
        })
    }

    pub fn state(&self) -> ConnectionState {
        let link = self.lock();
        match (&link.socket, &link.pending_retry) {
            (Some(socket), _) if socket.open => ConnectionState::Open,
            (Some(_), _) => ConnectionState::Connecting,
            (None, Some(_)) => ConnectionState::Retrying,
            (None, None) => ConnectionState::Idle,
        }
    }

    /// Failed attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    pub fn store(&self) -> &NotificationStore {
        &self.shared.store
    }

    fn open_channel(&self, link: &mut LinkState, token: String) {
        link.generation += 1;
        let generation = link.generation;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        link.socket = Some(SocketHandle {
            generation,
            open: false,
            shutdown: shutdown_tx,
        });

        debug!(
            component = "connection",
            event = "ws.connecting",
            generation,
            endpoint = %self.shared.endpoint,
        );
        tokio::spawn(run_channel(self.clone(), generation, token, shutdown_rx));
    }

    fn handle_open(&self, generation: u64) -> bool {
        let mut link = self.lock();
        if link.generation != generation {
            return false;
        }
        if let Some(socket) = link.socket.as_mut() {
            socket.open = true;
        }
        link.reconnect_attempts = 0;
        if let Some(retry) = link.pending_retry.take() {
            retry.abort();
        }
        info!(
            component = "connection",
            event = "ws.connection.opened",
            generation,
            "Notification channel connected"
        );
        true
    }

    fn handle_message(&self, generation: u64, text: &str) {
        if self.lock().generation != generation {
            return;
        }

        match ServerMessage::parse(text) {
            Ok(ServerMessage::Notification {
                message,
                alert_type,
                duration,
            }) => {
                let severity = known_field(generation, "alertType", alert_type).unwrap_or_default();
                let duration_ms = duration_ms(known_field(generation, "duration", duration))
                    .or(Some(self.shared.push_duration_ms));
                self.shared.store.insert(message, severity, duration_ms);
            }
            Err(e) => {
                debug!(
                    component = "connection",
                    event = "ws.message.discarded",
                    generation,
                    error = %e,
                    "Discarding unrecognized channel message"
                );
            }
        }
    }

    fn handle_close(&self, generation: u64) {
        let mut link = self.lock();
        if link
            .socket
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
        {
            link.socket = None;
        }
        if link.generation != generation {
            return;
        }

        if link.reconnect_attempts < self.shared.policy.max_attempts {
            let delay = self.shared.policy.delay_for(link.reconnect_attempts);
            link.reconnect_attempts += 1;
            info!(
                component = "connection",
                event = "ws.reconnect.scheduled",
                attempt = link.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Notification channel closed, retrying"
            );
            if let Some(previous) = link.pending_retry.take() {
                previous.abort();
            }
            link.pending_retry = Some(self.spawn_retry(generation, delay));
        } else {
            warn!(
                component = "connection",
                event = "ws.reconnect.exhausted",
                attempts = link.reconnect_attempts,
                "Giving up on the notification channel"
            );
            drop(link);
            self.shared
                .store
                .insert(RECONNECT_EXHAUSTED_MESSAGE, Severity::Warning, None);
        }
    }

    fn spawn_retry(&self, generation: u64, delay: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.retry(generation);
        })
    }

    fn retry(&self, generation: u64) {
        let mut link = self.lock();
        if link.generation != generation {
            return;
        }
        link.pending_retry = None;

        let Some(token) = self.shared.session.token() else {
            debug!(
                component = "connection",
                event = "ws.reconnect.skipped",
                "Session ended before retry fired"
            );
            return;
        };
        if link.socket.is_none() {
            self.open_channel(&mut link, token);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unwrap an optional push field, treating an unrecognized value as absent.
fn known_field<T>(generation: u64, field: &str, value: Option<Lenient<T>>) -> Option<T> {
    match value.map(Lenient::into_known) {
        Some(Ok(value)) => Some(value),
        Some(Err(raw)) => {
            debug!(
                component = "connection",
                event = "ws.message.field_ignored",
                generation,
                field,
                raw = %raw,
                "Ignoring unrecognized field value"
            );
            None
        }
        None => None,
    }
}

async fn run_channel<C: Connector>(
    manager: ConnectionManager<C>,
    generation: u64,
    token: String,
    mut shutdown: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        result = manager.shared.connector.open(&manager.shared.endpoint, Some(&token)) => result,
        _ = &mut shutdown => return,
    };

    let mut channel = match opened {
        Ok(channel) => channel,
        Err(e) => {
            warn!(
                component = "connection",
                event = "ws.connect.failed",
                generation,
                error = %e,
                "Notification channel failed to open"
            );
            manager.handle_close(generation);
            return;
        }
    };

    if !manager.handle_open(generation) {
        channel.close().await;
        return;
    }

    loop {
        let step = tokio::select! {
            event = channel.next_event() => Step::Event(event),
            _ = &mut shutdown => Step::Shutdown,
        };

        match step {
            Step::Event(Some(ChannelEvent::Message(text))) => {
                manager.handle_message(generation, &text)
            }
            Step::Event(Some(ChannelEvent::Error(error))) => {
                warn!(
                    component = "connection",
                    event = "ws.channel.error",
                    generation,
                    error = %error,
                    "Notification channel error"
                );
            }
            Step::Event(None) => break,
            Step::Shutdown => {
                channel.close().await;
                debug!(
                    component = "connection",
                    event = "ws.connection.closed_locally",
                    generation,
                );
                return;
            }
        }
    }

    info!(
        component = "connection",
        event = "ws.connection.closed",
        generation,
        "Notification channel closed"
    );
    manager.handle_close(generation);
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;
    use crate::session::test_session;
    use crate::transport::ChannelError;

    enum Plan {
        Refuse,
        Accept(ScriptedChannel),
    }

    #[derive(Default)]
    struct Script {
        attempts: Vec<(Instant, Option<String>)>,
        plans: VecDeque<Plan>,
    }

    /// Connector that refuses every attempt unless a channel was queued.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedConnector {
        fn accept_next(&self) -> (mpsc::UnboundedSender<ChannelEvent>, Arc<AtomicBool>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            let channel = ScriptedChannel {
                rx,
                closed: Arc::clone(&closed),
            };
            self.script.lock().unwrap().plans.push_back(Plan::Accept(channel));
            (tx, closed)
        }

        fn refuse_next(&self) {
            self.script.lock().unwrap().plans.push_back(Plan::Refuse);
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.script.lock().unwrap().attempts.iter().map(|(at, _)| *at).collect()
        }

        fn attempt_count(&self) -> usize {
            self.script.lock().unwrap().attempts.len()
        }

        fn tokens(&self) -> Vec<Option<String>> {
            self.script
                .lock()
                .unwrap()
                .attempts
                .iter()
                .map(|(_, token)| token.clone())
                .collect()
        }
    }

    impl Connector for ScriptedConnector {
        type Channel = ScriptedChannel;

        async fn open(
            &self,
            _url: &str,
            token: Option<&str>,
        ) -> Result<ScriptedChannel, ChannelError> {
            let plan = {
                let mut script = self.script.lock().unwrap();
                script.attempts.push((Instant::now(), token.map(str::to_owned)));
                script.plans.pop_front()
            };
            match plan {
                Some(Plan::Accept(channel)) => Ok(channel),
                Some(Plan::Refuse) | None => {
                    Err(ChannelError::Handshake("connection refused".to_string()))
                }
            }
        }
    }

    struct ScriptedChannel {
        rx: mpsc::UnboundedReceiver<ChannelEvent>,
        closed: Arc<AtomicBool>,
    }

    impl Channel for ScriptedChannel {
        async fn next_event(&mut self) -> Option<ChannelEvent> {
            self.rx.recv().await
        }

        async fn close(self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        manager: ConnectionManager<ScriptedConnector>,
        connector: ScriptedConnector,
        session: SessionProvider,
        store: NotificationStore,
    }

    fn harness() -> Harness {
        let connector = ScriptedConnector::default();
        let session = SessionProvider::new();
        let store = NotificationStore::new();
        let manager = ConnectionManager::new(
            connector.clone(),
            &ClientConfig::default(),
            session.clone(),
            store.clone(),
        );
        Harness {
            manager,
            connector,
            session,
            store,
        }
    }

    /// Let spawned tasks run without moving the paused clock meaningfully.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_without_session_is_a_noop() {
        let h = harness();
        h.manager.connect();
        settle().await;

        assert_eq!(h.connector.attempt_count(), 0);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_channel_backs_off_then_gives_up_once() {
        let h = harness();
        h.session.begin(test_session("token-1"));
        h.manager.connect();

        tokio::time::sleep(Duration::from_secs(120)).await;

        let times = h.connector.attempt_times();
        assert_eq!(times.len(), 6, "initial attempt plus five retries");
        let gaps: Vec<u128> = times
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000, 8000, 10000]);

        let toasts = h.store.snapshot();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].severity, Severity::Warning);
        assert_eq!(toasts[0].message, RECONNECT_EXHAUSTED_MESSAGE);
        assert_eq!(toasts[0].duration_ms, None);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let h = harness();
        h.session.begin(test_session("token-1"));
        h.manager.connect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.manager.state(), ConnectionState::Retrying);

        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Idle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.connector.attempt_count(), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_rechecks_session_when_it_fires() {
        let h = harness();
        h.session.begin(test_session("token-1"));
        h.manager.connect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        h.session.end();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.connector.attempt_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn session_push_reaches_store() {
        let h = harness();
        let (server, _closed) = h.connector.accept_next();
        let _binding = h.manager.bind_session();

        h.session.begin(test_session("token-1"));
        settle().await;
        assert_eq!(h.manager.state(), ConnectionState::Open);
        assert_eq!(h.connector.tokens(), vec![Some("token-1".to_string())]);

        server
            .send(ChannelEvent::Message(
                r#"{"type":"notification","message":"Hi","alertType":"success"}"#.to_string(),
            ))
            .unwrap();
        settle().await;

        let toasts = h.store.snapshot();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].message, "Hi");
        assert_eq!(toasts[0].severity, Severity::Success);
        assert_eq!(toasts[0].duration_ms, Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payloads_are_dropped() {
        let h = harness();
        let (server, _closed) = h.connector.accept_next();
        h.session.begin(test_session("token-1"));
        h.manager.connect();
        settle().await;

        server.send(ChannelEvent::Message("not json".to_string())).unwrap();
        server
            .send(ChannelEvent::Message(r#"{"type":"ping"}"#.to_string()))
            .unwrap();
        server
            .send(ChannelEvent::Error("frame too large".to_string()))
            .unwrap();
        settle().await;

        assert!(h.store.is_empty());
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_duration_and_severity_are_respected() {
        let h = harness();
        let (server, _closed) = h.connector.accept_next();
        h.session.begin(test_session("token-1"));
        h.manager.connect();
        settle().await;

        server
            .send(ChannelEvent::Message(
                r#"{"type":"notification","message":"stay","alertType":"error","duration":0}"#
                    .to_string(),
            ))
            .unwrap();
        server
            .send(ChannelEvent::Message(
                r#"{"type":"notification","message":"plain"}"#.to_string(),
            ))
            .unwrap();
        settle().await;

        let toasts = h.store.snapshot();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].severity, Severity::Error);
        assert_eq!(toasts[0].duration_ms, Some(0));
        assert_eq!(toasts[1].severity, Severity::Info);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let remaining = h.store.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "stay");
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_optional_fields_fall_back_to_defaults() {
        let h = harness();
        let (server, _closed) = h.connector.accept_next();
        h.session.begin(test_session("token-1"));
        h.manager.connect();
        settle().await;

        server
            .send(ChannelEvent::Message(
                r#"{"type":"notification","message":"Deploy done","alertType":"critical"}"#
                    .to_string(),
            ))
            .unwrap();
        server
            .send(ChannelEvent::Message(
                r#"{"type":"notification","message":"Saved","alertType":"success","duration":"3000"}"#
                    .to_string(),
            ))
            .unwrap();
        settle().await;

        let toasts = h.store.snapshot();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].message, "Deploy done");
        assert_eq!(toasts[0].severity, Severity::Info);
        assert_eq!(toasts[0].duration_ms, Some(5000));
        assert_eq!(toasts[1].message, "Saved");
        assert_eq!(toasts[1].severity, Severity::Success);
        assert_eq!(toasts[1].duration_ms, Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_open_is_a_noop() {
        let h = harness();
        let (_server, _closed) = h.connector.accept_next();
        h.session.begin(test_session("token-1"));
        h.manager.connect();
        settle().await;
        h.manager.connect();
        h.manager.connect();
        settle().await;

        assert_eq!(h.connector.attempt_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_backoff() {
        let h = harness();
        h.connector.refuse_next();
        h.connector.refuse_next();
        let (server, _closed) = h.connector.accept_next();
        h.session.begin(test_session("token-1"));
        h.manager.connect();

        // Attempts at t=0 and t=1000 fail, t=3000 succeeds.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.manager.state(), ConnectionState::Open);
        assert_eq!(h.manager.reconnect_attempts(), 0);

        let closed_at = Instant::now();
        drop(server);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let times = h.connector.attempt_times();
        assert_eq!(times.len(), 4);
        assert_eq!((times[3] - closed_at).as_millis(), 1000);
        assert_eq!(h.manager.reconnect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_closes_channel_without_retry() {
        let h = harness();
        let (_server, closed) = h.connector.accept_next();
        let _binding = h.manager.bind_session();

        h.session.begin(test_session("token-1"));
        settle().await;
        assert_eq!(h.manager.state(), ConnectionState::Open);

        h.session.end();
        settle().await;
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(h.manager.state(), ConnectionState::Idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.attempt_count(), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_login_after_exhaustion_starts_fresh() {
        let h = harness();
        let _binding = h.manager.bind_session();
        h.session.begin(test_session("token-1"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.connector.attempt_count(), 6);
        assert_eq!(h.store.len(), 1);

        let (_server, _closed) = h.connector.accept_next();
        h.session.begin(test_session("token-2"));
        settle().await;

        assert_eq!(h.manager.state(), ConnectionState::Open);
        assert_eq!(
            h.connector.tokens().last().cloned().flatten().as_deref(),
            Some("token-2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn profile_update_keeps_channel() {
        let h = harness();
        let (_server, closed) = h.connector.accept_next();
        let _binding = h.manager.bind_session();
        let session = test_session("token-1");
        h.session.begin(session.clone());
        settle().await;

        let mut user = session.user;
        user.name = "Renamed".to_string();
        h.session.update_user(user);
        settle().await;

        assert!(!closed.load(Ordering::SeqCst));
        assert_eq!(h.connector.attempt_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }
}
