//! MTProto adapter (grammers).
//!
//! Implements the `rcb-core` remote auth ports with an in-memory
//! `grammers` session per login attempt. Exported sessions are the
//! serialized grammers session, URL-safe base64 without padding.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use grammers_client::{
    types::{LoginToken, PasswordToken},
    Client, Config, InitParams, SignInError,
};
use grammers_session::Session;
use tracing::debug;

use rcb_core::{
    auth::{RemoteAuthClient, RemoteAuthConnector, RemoteAuthError, SignInOutcome, UserSession},
    domain::AppCredentials,
};

/// Connector backed by `grammers-client`.
#[derive(Clone, Debug, Default)]
pub struct MtprotoConnector;

impl MtprotoConnector {
    pub fn new() -> Self {
        Self
    }

    async fn open(app: &AppCredentials, session: Session) -> Result<Client, RemoteAuthError> {
        Client::connect(Config {
            session,
            api_id: app.api_id,
            api_hash: app.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| RemoteAuthError::Transport(e.to_string()))
    }
}

#[async_trait]
impl RemoteAuthConnector for MtprotoConnector {
    async fn connect(
        &self,
        app: &AppCredentials,
    ) -> Result<Box<dyn RemoteAuthClient>, RemoteAuthError> {
        let client = Self::open(app, Session::new()).await?;
        debug!("remote auth connection opened");
        Ok(Box::new(MtprotoAuthClient {
            client,
            login_token: None,
            password_token: None,
        }))
    }

    async fn restore(
        &self,
        app: &AppCredentials,
        session: &str,
    ) -> Result<Box<dyn UserSession>, RemoteAuthError> {
        let session = decode_session(session)?;
        let client = Self::open(app, session).await?;
        Ok(Box::new(MtprotoUserSession { client }))
    }
}

/// One login handshake. Holds the tokens that link its steps.
pub struct MtprotoAuthClient {
    client: Client,
    login_token: Option<LoginToken>,
    password_token: Option<PasswordToken>,
}

#[async_trait]
impl RemoteAuthClient for MtprotoAuthClient {
    async fn send_code(&mut self, phone: &str) -> Result<(), RemoteAuthError> {
        let token = self
            .client
            .request_login_code(phone)
            .await
            .map_err(|e| classify(&e.to_string()))?;
        self.login_token = Some(token);
        Ok(())
    }

    async fn sign_in(&mut self, code: &str) -> Result<SignInOutcome, RemoteAuthError> {
        let token = self
            .login_token
            .as_ref()
            .ok_or(RemoteAuthError::NotStarted)?;
        match self.client.sign_in(token, code).await {
            Ok(_) => Ok(SignInOutcome::Authorized),
            Err(SignInError::PasswordRequired(password_token)) => {
                self.password_token = Some(password_token);
                Ok(SignInOutcome::PasswordRequired)
            }
            Err(e) => Err(map_sign_in(e)),
        }
    }

    async fn check_password(&mut self, password: &str) -> Result<(), RemoteAuthError> {
        let token = self
            .password_token
            .take()
            .ok_or(RemoteAuthError::NotStarted)?;
        self.client
            .check_password(token, password.as_bytes())
            .await
            .map(|_| ())
            .map_err(map_sign_in)
    }

    async fn export_session(&mut self) -> Result<String, RemoteAuthError> {
        Ok(encode_session(&self.client.session().save()))
    }

    async fn disconnect(self: Box<Self>) -> Result<(), RemoteAuthError> {
        // The connection closes once the last client handle is dropped.
        drop(self.client);
        debug!("remote auth connection closed");
        Ok(())
    }
}

/// Long-lived session restored from a stored credential.
pub struct MtprotoUserSession {
    client: Client,
}

#[async_trait]
impl UserSession for MtprotoUserSession {
    async fn whoami(&self) -> Result<Option<String>, RemoteAuthError> {
        let authorized = self
            .client
            .is_authorized()
            .await
            .map_err(|e| RemoteAuthError::Transport(e.to_string()))?;
        if !authorized {
            return Ok(None);
        }
        let me = self
            .client
            .get_me()
            .await
            .map_err(|e| RemoteAuthError::Transport(e.to_string()))?;
        Ok(Some(me.full_name()))
    }
}

fn map_sign_in(e: SignInError) -> RemoteAuthError {
    match e {
        SignInError::InvalidCode => RemoteAuthError::CodeInvalid,
        SignInError::InvalidPassword => RemoteAuthError::PasswordInvalid,
        SignInError::SignUpRequired { .. } => RemoteAuthError::SignUpRequired,
        SignInError::PasswordRequired(_) => RemoteAuthError::NotStarted,
        other => classify(&other.to_string()),
    }
}

/// Map an RPC error rendering onto the failures the login flow tells apart.
fn classify(rendered: &str) -> RemoteAuthError {
    let rules = [
        ("PHONE_NUMBER_INVALID", RemoteAuthError::PhoneInvalid),
        ("PHONE_NUMBER_BANNED", RemoteAuthError::PhoneInvalid),
        ("PHONE_CODE_INVALID", RemoteAuthError::CodeInvalid),
        ("PHONE_CODE_EMPTY", RemoteAuthError::CodeInvalid),
        ("PHONE_CODE_EXPIRED", RemoteAuthError::CodeExpired),
        ("PASSWORD_HASH_INVALID", RemoteAuthError::PasswordInvalid),
        ("PHONE_NUMBER_UNOCCUPIED", RemoteAuthError::SignUpRequired),
    ];
    rules
        .into_iter()
        .find(|(name, _)| rendered.contains(name))
        .map(|(_, err)| err)
        .unwrap_or_else(|| RemoteAuthError::Transport(rendered.to_string()))
}

pub fn encode_session(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_session(s: &str) -> Result<Session, RemoteAuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|e| RemoteAuthError::Transport(format!("malformed session string: {e}")))?;
    Session::load(&bytes)
        .map_err(|e| RemoteAuthError::Transport(format!("unreadable session: {e}")))
}
