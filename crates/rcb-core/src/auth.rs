//! Remote authentication ports.
//!
//! A [`RemoteAuthClient`] is an ephemeral connection to the messaging
//! platform that exists only for one login attempt. It keeps the partial
//! code-exchange tokens between steps, so the flow only ever passes the
//! user's replies.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{config::SessionMode, domain::AppCredentials};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteAuthError {
    #[error("phone number is invalid")]
    PhoneInvalid,

    #[error("login code is invalid")]
    CodeInvalid,

    #[error("login code has expired")]
    CodeExpired,

    #[error("two-step verification password is invalid")]
    PasswordInvalid,

    #[error("phone number is not registered")]
    SignUpRequired,

    #[error("authentication step called out of order")]
    NotStarted,

    #[error("{0}")]
    Transport(String),
}

/// Result of submitting the one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInOutcome {
    Authorized,
    PasswordRequired,
}

/// One in-flight authentication handshake.
#[async_trait]
pub trait RemoteAuthClient: Send {
    /// Ask the platform to deliver a one-time code to `phone`.
    async fn send_code(&mut self, phone: &str) -> Result<(), RemoteAuthError>;

    /// Submit the one-time code received for the phone from `send_code`.
    async fn sign_in(&mut self, code: &str) -> Result<SignInOutcome, RemoteAuthError>;

    /// Submit the second-factor password after `PasswordRequired`.
    async fn check_password(&mut self, password: &str) -> Result<(), RemoteAuthError>;

    /// Serialize the authorized session into an opaque credential string.
    async fn export_session(&mut self) -> Result<String, RemoteAuthError>;

    /// Tear the connection down.
    async fn disconnect(self: Box<Self>) -> Result<(), RemoteAuthError>;
}

/// A long-lived session restored from a stored credential.
#[async_trait]
pub trait UserSession: Send + Sync {
    /// Display name of the authorized account, `None` if the session is no
    /// longer authorized.
    async fn whoami(&self) -> Result<Option<String>, RemoteAuthError>;
}

/// Factory for platform connections.
#[async_trait]
pub trait RemoteAuthConnector: Send + Sync {
    async fn connect(
        &self,
        app: &AppCredentials,
    ) -> Result<Box<dyn RemoteAuthClient>, RemoteAuthError>;

    async fn restore(
        &self,
        app: &AppCredentials,
        session: &str,
    ) -> Result<Box<dyn UserSession>, RemoteAuthError>;
}

/// Restore the pre-provisioned shared session, if the bot runs in shared mode.
///
/// A session that fails to restore is logged and skipped; the bot keeps
/// serving `/start` and `/status` without it.
pub async fn restore_shared(
    connector: &dyn RemoteAuthConnector,
    app: &AppCredentials,
    mode: &SessionMode,
) -> Option<Arc<dyn UserSession>> {
    let SessionMode::Shared(session) = mode else {
        return None;
    };
    match connector.restore(app, session).await {
        Ok(s) => {
            info!("shared user session restored");
            Some(Arc::from(s))
        }
        Err(e) => {
            warn!(error = %e, "failed to restore shared user session");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settings, ClientScript, FakeConnector};

    #[tokio::test]
    async fn restores_only_in_shared_mode() {
        let connector = FakeConnector::new(ClientScript::default());
        let app = settings().app;

        assert!(restore_shared(connector.as_ref(), &app, &SessionMode::PerUser)
            .await
            .is_none());
        assert!(restore_shared(connector.as_ref(), &app, &SessionMode::Off)
            .await
            .is_none());

        let shared = restore_shared(
            connector.as_ref(),
            &app,
            &SessionMode::Shared("abc".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(
            shared.whoami().await.unwrap().as_deref(),
            Some("Shared Account")
        );
    }
}
