//! Typed REST client for the toolhub API.
//!
//! Every request carries the active session's bearer token. A `401` from any
//! endpoint ends the session, which in turn tears down the notification
//! channel through the session provider.

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use toolhub_protocol::client::{
    LoginRequest, PageQuery, PasswordChange, ProfileUpdate, RegisterRequest, SettingsUpdate,
    ToolDraft, ToolInput, ToolQuery, UserUpdate,
};
use toolhub_protocol::{
    AdminSettings, AdminStats, ApiErrorBody, AuthResponse, LogsPage, RunResult,
    StoredNotification, SystemStatus, Tool, ToolsPage, User, UsersPage,
};

use crate::session::{Session, SessionProvider};

/// Errors returned by API calls
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Request failed with {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not logged in")]
    NotLoggedIn,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionProvider,
}

#[derive(Serialize)]
struct DeleteLogsQuery<'a> {
    before: &'a str,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: SessionProvider) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, session)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session: SessionProvider,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            session,
        }
    }

    pub fn session(&self) -> &SessionProvider {
        &self.session
    }

    // -- Auth --

    /// Log in and start a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .send(self.request(Method::POST, "/auth/login").json(&body))
            .await?;
        Ok(self.start_session(auth))
    }

    /// Create an account and start a session.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, ApiError> {
        let body = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .send(self.request(Method::POST, "/auth/register").json(&body))
            .await?;
        Ok(self.start_session(auth))
    }

    /// Resume a session from a previously issued token.
    ///
    /// The session only starts if `/auth/me` accepts the token.
    pub async fn restore(&self, token: &str) -> Result<User, ApiError> {
        let request = self
            .http
            .request(Method::GET, self.url("/auth/me"))
            .bearer_auth(token);
        match self.send::<User>(request).await {
            Ok(user) => {
                self.session.begin(Session {
                    user: user.clone(),
                    token: token.to_string(),
                });
                Ok(user)
            }
            Err(e) => {
                self.session.end_if_token(token);
                Err(e)
            }
        }
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.require_session()?;
        let user: User = self.send(self.request(Method::GET, "/auth/me")).await?;
        self.session.update_user(user.clone());
        Ok(user)
    }

    /// End the session locally, whether or not the server call succeeds.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = match self.session.is_active() {
            true => self.send_unit(self.request(Method::POST, "/auth/logout")).await,
            false => Ok(()),
        };
        self.session.end();
        result
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.require_session()?;
        let user: User = self
            .send(self.request(Method::PUT, "/auth/profile").json(update))
            .await?;
        self.session.update_user(user.clone());
        Ok(user)
    }

    // -- Tools --

    pub async fn list_tools(&self, query: &ToolQuery) -> Result<ToolsPage, ApiError> {
        self.send(self.request(Method::GET, "/tools").query(query))
            .await
    }

    pub async fn get_tool(&self, id: &str) -> Result<Tool, ApiError> {
        self.send(self.request(Method::GET, &format!("/tools/{}", segment(id))))
            .await
    }

    pub async fn create_tool(&self, draft: &ToolDraft) -> Result<Tool, ApiError> {
        self.send(self.request(Method::POST, "/tools").json(draft))
            .await
    }

    pub async fn update_tool(&self, id: &str, draft: &ToolDraft) -> Result<Tool, ApiError> {
        self.send(
            self.request(Method::PUT, &format!("/tools/{}", segment(id)))
                .json(draft),
        )
        .await
    }

    pub async fn delete_tool(&self, id: &str) -> Result<(), ApiError> {
        self.send_unit(self.request(Method::DELETE, &format!("/tools/{}", segment(id))))
            .await
    }

    pub async fn execute_tool(&self, id: &str, input: &ToolInput) -> Result<RunResult, ApiError> {
        self.send(
            self.request(Method::POST, &format!("/tools/{}/execute", segment(id)))
                .json(input),
        )
        .await
    }

    pub async fn run_tool(&self, id: &str, input: &ToolInput) -> Result<RunResult, ApiError> {
        self.send(
            self.request(Method::POST, &format!("/tools/{}/run", segment(id)))
                .json(input),
        )
        .await
    }

    // -- Admin --

    pub async fn admin_stats(&self) -> Result<AdminStats, ApiError> {
        self.send(self.request(Method::GET, "/admin/stats")).await
    }

    pub async fn system_status(&self) -> Result<SystemStatus, ApiError> {
        self.send(self.request(Method::GET, "/admin/status")).await
    }

    pub async fn settings(&self) -> Result<AdminSettings, ApiError> {
        self.send(self.request(Method::GET, "/admin/settings")).await
    }

    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<AdminSettings, ApiError> {
        self.send(self.request(Method::PUT, "/admin/settings").json(update))
            .await
    }

    pub async fn logs(&self, query: &PageQuery) -> Result<LogsPage, ApiError> {
        self.send(self.request(Method::GET, "/admin/logs").query(query))
            .await
    }

    /// Delete log entries older than `before` (an ISO-8601 timestamp).
    pub async fn delete_logs(&self, before: &str) -> Result<(), ApiError> {
        self.send_unit(
            self.request(Method::DELETE, "/admin/logs")
                .query(&DeleteLogsQuery { before }),
        )
        .await
    }

    pub async fn users(&self, query: &PageQuery) -> Result<UsersPage, ApiError> {
        self.send(self.request(Method::GET, "/admin/users").query(query))
            .await
    }

    pub async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<User, ApiError> {
        self.send(
            self.request(Method::PUT, &format!("/admin/users/{}", segment(id)))
                .json(update),
        )
        .await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ApiError> {
        self.send_unit(self.request(Method::DELETE, &format!("/admin/users/{}", segment(id))))
            .await
    }

    pub async fn set_user_blocked(&self, id: &str, blocked: bool) -> Result<(), ApiError> {
        let action = if blocked { "block" } else { "unblock" };
        self.send_unit(self.request(
            Method::POST,
            &format!("/admin/users/{}/{action}", segment(id)),
        ))
        .await
    }

    pub async fn recent_activity(&self) -> Result<Vec<Value>, ApiError> {
        self.send(self.request(Method::GET, "/admin/activity")).await
    }

    // -- Account --

    pub async fn change_password(&self, change: &PasswordChange) -> Result<(), ApiError> {
        self.require_session()?;
        self.send_unit(self.request(Method::PUT, "/users/password").json(change))
            .await
    }

    /// Delete the current account and end the session.
    pub async fn delete_account(&self) -> Result<(), ApiError> {
        self.require_session()?;
        self.send_unit(self.request(Method::DELETE, "/users/account"))
            .await?;
        self.session.end();
        Ok(())
    }

    pub async fn inbox(&self) -> Result<Vec<StoredNotification>, ApiError> {
        self.send(self.request(Method::GET, "/users/notifications"))
            .await
    }

    pub async fn mark_read(&self, notification_id: &str) -> Result<(), ApiError> {
        self.send_unit(self.request(
            Method::PUT,
            &format!("/users/notifications/{}/read", segment(notification_id)),
        ))
        .await
    }

    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.send_unit(self.request(Method::PUT, "/users/notifications/read-all"))
            .await
    }

    pub async fn delete_stored_notification(&self, notification_id: &str) -> Result<(), ApiError> {
        self.send_unit(self.request(
            Method::DELETE,
            &format!("/users/notifications/{}", segment(notification_id)),
        ))
        .await
    }

    // -- Plumbing --

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn require_session(&self) -> Result<(), ApiError> {
        match self.session.is_active() {
            true => Ok(()),
            false => Err(ApiError::NotLoggedIn),
        }
    }

    fn start_session(&self, auth: AuthResponse) -> User {
        let user = auth.user.clone();
        self.session.begin(Session {
            user: auth.user,
            token: auth.token,
        });
        user
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.execute(builder).await?;
        Ok(response.json().await?)
    }

    async fn send_unit(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.execute(builder).await?;
        Ok(())
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let (http, request) = builder.build_split();
        let request = request?;
        let sent_token = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_owned);
        let response = http.execute(request).await?;
        self.check(response, sent_token.as_deref()).await
    }

    /// A `401` only ends the session that sent the request; a newer login
    /// survives late rejections of an older token.
    async fn check(
        &self,
        response: reqwest::Response,
        sent_token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        debug!(
            component = "api",
            event = "api.response",
            url = %response.url(),
            status = status.as_u16(),
        );

        if status == StatusCode::UNAUTHORIZED {
            warn!(
                component = "api",
                event = "api.unauthorized",
                url = %response.url(),
                "Token rejected"
            );
            if let Some(token) = sent_token {
                self.session.end_if_token(token);
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.message,
                Err(_) => fallback,
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

fn segment(value: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:3001/api/", SessionProvider::new());
        assert_eq!(client.url("/tools"), "http://localhost:3001/api/tools");
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
        assert_eq!(segment("64f1c0"), "64f1c0");
    }

    #[tokio::test]
    async fn session_bound_calls_require_login() {
        let client = ApiClient::new("http://127.0.0.1:9", SessionProvider::new());
        assert!(matches!(client.me().await, Err(ApiError::NotLoggedIn)));
        assert!(matches!(
            client.delete_account().await,
            Err(ApiError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn logout_without_session_is_local() {
        let client = ApiClient::new("http://127.0.0.1:9", SessionProvider::new());
        assert!(client.logout().await.is_ok());
    }
}
