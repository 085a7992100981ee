//! toolhub client core
//!
//! Session state, the self-healing notification channel, the toast store, and
//! a typed client for the REST API. The pieces are plain service objects; wire
//! them together yourself or use [`Toolhub`].

pub mod api;
pub mod config;
pub mod connection;
pub mod notifications;
pub mod session;
pub mod transport;

pub use api::{ApiClient, ApiError};
pub use config::{ClientConfig, ConfigError, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionState};
pub use notifications::{Notification, NotificationStore, StoreEvent};
pub use session::{Session, SessionProvider};
pub use transport::{Channel, ChannelError, ChannelEvent, Connector, WsConnector};

use tokio::task::JoinHandle;

/// The full client stack over WebSocket, with the channel bound to the
/// session.
pub struct Toolhub {
    pub config: ClientConfig,
    pub session: SessionProvider,
    pub notifications: NotificationStore,
    pub api: ApiClient,
    pub connection: ConnectionManager<WsConnector>,
    binding: JoinHandle<()>,
}

impl Toolhub {
    /// Build every service and start following the session. Requires a
    /// running Tokio runtime.
    pub fn start(config: ClientConfig) -> Self {
        let session = SessionProvider::new();
        let notifications = NotificationStore::new();
        let api = ApiClient::new(config.api_url.clone(), session.clone());
        let connection = ConnectionManager::new(
            WsConnector::default(),
            &config,
            session.clone(),
            notifications.clone(),
        );
        let binding = connection.bind_session();

        Self {
            config,
            session,
            notifications,
            api,
            connection,
            binding,
        }
    }

    /// Stop following the session and close the channel.
    pub fn shutdown(self) {
        self.binding.abort();
        self.connection.disconnect();
    }
}
