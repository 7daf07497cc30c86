//! `/logout`: forget the stored session of a user.

use tracing::{info, warn};

use crate::{domain::UserId, formatting::code, login::LoginService, store::StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    LoggedOut,
    NotLoggedIn,
}

impl LogoutOutcome {
    pub fn user_message(&self) -> String {
        match self {
            Self::LoggedOut => "<b>✅ Logout Successfully</b>".to_string(),
            Self::NotLoggedIn => "<b>You are not logged in.</b>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogoutError {
    #[error("login system is disabled")]
    Disabled,

    #[error("credential store unavailable")]
    StoreUnavailable,

    #[error("failed to clear credentials: {0}")]
    Store(String),
}

impl LogoutError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Disabled => "<b>Login system is disabled on this bot.</b>".to_string(),
            Self::StoreUnavailable => {
                "<b>Database not available. Logout not possible.</b>".to_string()
            }
            Self::Store(detail) => format!("<b>Error during logout:</b> {}", code(detail)),
        }
    }
}

impl LoginService {
    /// Clear session, app id and app hash of `user`.
    ///
    /// Idempotent: a second call reports `NotLoggedIn`.
    pub async fn logout(&self, user: UserId) -> Result<LogoutOutcome, LogoutError> {
        if !self.settings.enabled {
            return Err(LogoutError::Disabled);
        }

        let session = match self.store.get_session(user).await {
            Ok(s) => s,
            Err(StoreError::Unavailable) => return Err(LogoutError::StoreUnavailable),
            Err(e) => {
                warn!(user_id = %user, error = %e, "session lookup failed; treating as logged out");
                None
            }
        };
        if session.is_none() {
            return Ok(LogoutOutcome::NotLoggedIn);
        }

        self.store
            .clear_credentials(user)
            .await
            .map_err(|e| match e {
                StoreError::Unavailable => LogoutError::StoreUnavailable,
                StoreError::Backend(detail) => LogoutError::Store(detail),
            })?;
        info!(user_id = %user, "logged out");
        Ok(LogoutOutcome::LoggedOut)
    }

    /// Run `/logout` and tell the user how it went.
    pub async fn run_logout(&self, chat: crate::domain::ChatId, user: UserId) {
        let text = match self.logout(user).await {
            Ok(outcome) => outcome.user_message(),
            Err(e) => {
                warn!(user_id = %user, error = %e, "logout failed");
                e.user_message()
            }
        };
        if let Err(e) = self.messenger.send_html(chat, &text).await {
            warn!(user_id = %user, error = %e, "failed to send logout result");
        }
    }
}
