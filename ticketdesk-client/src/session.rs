use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    api::{ApiClient, ApiConfig, ApiError, AuthenticatedUser, SessionRecord},
    channel::{ChannelConfig, ChannelHandle, NotificationChannel, NotificationHandler},
    credentials::CredentialStore,
    retry::RetryWindows,
};

/// Endpoint keys tracked by the retry gate. These match the operation
/// names the backend rate-limits on.
pub const ENDPOINT_LOGIN: &str = "login";
pub const ENDPOINT_CHANGE_PASSWORD: &str = "changePassword";
pub const ENDPOINT_FORGOT_PASSWORD: &str = "forgotPassword";

#[derive(Debug, Error)]
pub enum SessionError {
    /// Blocked client-side: an earlier rate-limit window is still open,
    /// so no network call was made.
    #[error("please wait {} seconds before trying again", .wait.as_millis().div_ceil(1000))]
    RetryBlocked { wait: Duration },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("no stored session; log in first")]
    NoStoredSession,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api: ApiConfig,
    pub channel: ChannelConfig,
}

/// Owns everything scoped to one authenticated session: the retry gate,
/// the push channel, the REST client, and the persisted record.
///
/// One controller per login session, created by the application shell
/// and handed to views by reference. All methods take `&mut self`; the
/// UI event loop serializes access, so no further locking is needed.
pub struct SessionController {
    api: ApiClient,
    channel: NotificationChannel,
    retry: RetryWindows,
    store: CredentialStore,
    current: Option<SessionRecord>,
}

impl SessionController {
    pub fn new(config: SessionConfig, store: CredentialStore) -> Result<Self, ApiError> {
        Ok(Self {
            api: ApiClient::new(config.api)?,
            channel: NotificationChannel::new(config.channel),
            retry: RetryWindows::new(),
            store,
            current: None,
        })
    }

    /// Retry gate, exposed read-only so countdown views can render
    /// remaining wait times.
    pub fn retry_gate(&self) -> &RetryWindows {
        &self.retry
    }

    pub fn current_user(&self) -> Option<&AuthenticatedUser> {
        self.current.as_ref().map(|record| &record.user)
    }

    /// Logs in, honoring any open rate-limit window before touching the
    /// network. Success clears the window and persists the session.
    pub async fn login(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, SessionError> {
        self.gate(ENDPOINT_LOGIN)?;

        match self.api.login(email, password).await {
            Ok(record) => {
                self.retry.clear_retry_timer(ENDPOINT_LOGIN);
                if let Err(err) = self.store.save(&record) {
                    warn!("could not persist session: {err}");
                }
                info!(user_id = %record.user.id, "logged in");
                let user = record.user.clone();
                self.current = Some(record);
                Ok(user)
            }
            Err(err) => Err(self.note_rate_limit(ENDPOINT_LOGIN, err)),
        }
    }

    /// Changes the password and ends the session on success; the backend
    /// invalidates the token, so the user signs in again.
    pub async fn change_password(
        &mut self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        self.gate(ENDPOINT_CHANGE_PASSWORD)?;

        let Some(token) = self.current_token() else {
            return Err(SessionError::NoStoredSession);
        };

        match self
            .api
            .change_password(&token, current_password, new_password)
            .await
        {
            Ok(()) => {
                self.retry.clear_retry_timer(ENDPOINT_CHANGE_PASSWORD);
                info!("password changed; ending session");
                self.logout();
                Ok(())
            }
            Err(err) => Err(self.note_rate_limit(ENDPOINT_CHANGE_PASSWORD, err)),
        }
    }

    pub async fn forgot_password(&mut self, email: &str) -> Result<(), SessionError> {
        self.gate(ENDPOINT_FORGOT_PASSWORD)?;

        match self.api.forgot_password(email).await {
            Ok(()) => {
                self.retry.clear_retry_timer(ENDPOINT_FORGOT_PASSWORD);
                Ok(())
            }
            Err(err) => Err(self.note_rate_limit(ENDPOINT_FORGOT_PASSWORD, err)),
        }
    }

    /// Opens the push channel for the user logged in within this
    /// controller.
    pub fn connect_notifications(&mut self, handler: NotificationHandler) -> Option<&ChannelHandle> {
        let Some(record) = self.current.clone() else {
            error!("no authenticated session; cannot open push channel");
            return None;
        };
        self.channel.connect(&record.token, &record.user.id, handler)
    }

    /// Opens the push channel from the stored session record (app
    /// restart path). Fails the same way as a direct connect when
    /// nothing usable is stored.
    pub fn connect_notifications_with_stored(
        &mut self,
        handler: NotificationHandler,
    ) -> Option<&ChannelHandle> {
        let Some(record) = self.store.load_optional() else {
            error!("no stored credential; log in before opening the push channel");
            return None;
        };
        let handle = self.channel.connect(&record.token, &record.user.id, handler);
        if handle.is_some() {
            self.current = Some(record);
        }
        handle
    }

    pub fn notifications(&self) -> Option<&ChannelHandle> {
        self.channel.active()
    }

    pub fn disconnect_notifications(&mut self) {
        self.channel.disconnect();
    }

    /// Tears down the push channel and forgets the stored session.
    pub fn logout(&mut self) {
        self.channel.disconnect();
        if let Err(err) = self.store.clear() {
            warn!("could not clear stored session: {err}");
        }
        self.current = None;
        info!("session ended");
    }

    fn current_token(&self) -> Option<String> {
        self.current
            .as_ref()
            .map(|record| record.token.clone())
            .or_else(|| self.store.load_optional().map(|record| record.token))
    }

    fn gate(&self, endpoint: &str) -> Result<(), SessionError> {
        let wait = self.retry.remaining_wait(endpoint);
        if wait.is_zero() {
            Ok(())
        } else {
            Err(SessionError::RetryBlocked { wait })
        }
    }

    /// Starts a retry window when the failure was a rate limit, then
    /// hands the error back for display.
    fn note_rate_limit(&mut self, endpoint: &str, err: ApiError) -> SessionError {
        if let Some(wait) = err.retry_wait() {
            self.retry.set_retry_timer(endpoint, wait);
        }
        SessionError::Api(err)
    }
}
