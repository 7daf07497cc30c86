//! Interactive login flow.
//!
//! `/login` walks the user through phone number → one-time code → optional
//! two-step password, then exports the authorized session and stores it.
//! Every failure is terminal for the attempt; the user reissues `/login`.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, OnceLock},
};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    auth::{RemoteAuthClient, RemoteAuthConnector, RemoteAuthError, SignInOutcome},
    config::{Config, LoginTimeouts},
    domain::{AppCredentials, ChatId, UserId},
    formatting::code,
    messaging::{
        port::MessagingPort,
        replies::{AskError, ReplyWaiter},
        types::ChatAction,
    },
    store::{CredentialStore, StoreError},
};

/// Exported sessions shorter than this are truncated or corrupt.
pub const MIN_SESSION_LEN: usize = 351;

/// Literal reply that aborts the flow at any prompt.
pub const CANCEL_TOKEN: &str = "/cancel";

const PHONE_PROMPT: &str = "<b>Please send your phone number which includes country code</b>\n\
<b>Example:</b> <code>+13124562345, +9171828181889</code>\n\n\
<i>Note: We'll send an OTP to this number to authenticate your account.</i>\n\n\
Enter /cancel to cancel the process";

const CODE_PROMPT: &str = "Please check for an OTP in your Telegram account. \
If you got it, send OTP here after reading the below format.\n\n\
If OTP is <code>12345</code>, <b>please send it as</b> <code>1 2 3 4 5</code>.\n\n\
<b>Enter /cancel to cancel the process</b>";

const PASSWORD_PROMPT: &str = "<b>Your account has enabled two-step verification. \
Please provide the password.</b>\n\n<b>Enter /cancel to cancel the process</b>";

const SENDING_CODE: &str = "Sending OTP...";

pub const LOGIN_SUCCESS: &str = "<b>✅ Account Login Successfully!\n\n\
You can now use the bot to download restricted content.\n\n\
If you get any error related to AUTH KEY, /logout first and /login again.</b>";

/// Where an attempt currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginStep {
    AwaitingPhone,
    SendingCode,
    AwaitingCode,
    AwaitingPassword,
    Persisting,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("login system is disabled")]
    Disabled,

    #[error("credential store unavailable")]
    StoreUnavailable,

    #[error("user already has a stored session")]
    AlreadyLoggedIn,

    #[error("a login attempt is already running for this user")]
    InProgress,

    #[error("timed out at {0:?}")]
    Timeout(LoginStep),

    #[error("cancelled by user")]
    Cancelled,

    #[error("phone number is not in international format")]
    InvalidPhoneFormat,

    #[error("platform rejected the attempt: {0}")]
    Rejected(RemoteAuthError),

    #[error("exported session is too short")]
    ExportInvalid,

    #[error("failed to store session: {0}")]
    StoreWrite(String),

    #[error("transport error at {step:?}: {detail}")]
    Transport { step: LoginStep, detail: String },
}

impl LoginError {
    fn remote(step: LoginStep, err: RemoteAuthError) -> Self {
        match err {
            RemoteAuthError::Transport(detail) => Self::Transport { step, detail },
            RemoteAuthError::NotStarted => Self::Transport {
                step,
                detail: err.to_string(),
            },
            other => Self::Rejected(other),
        }
    }

    fn ask(step: LoginStep, err: AskError) -> Self {
        match err {
            AskError::Timeout => Self::Timeout(step),
            AskError::Superseded => Self::Cancelled,
            AskError::Send(detail) => Self::Transport { step, detail },
        }
    }

    /// Fixed, HTML-formatted message for the user who ran `/login`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Disabled => "<b>Login system is disabled on this bot.</b>".to_string(),
            Self::StoreUnavailable => {
                "<b>Database not available. Login not possible.</b>".to_string()
            }
            Self::AlreadyLoggedIn => "<b>You are already logged in. First /logout your old \
session, then /login again.</b>"
                .to_string(),
            Self::InProgress => {
                "<b>A login is already in progress. Finish it or send /cancel.</b>".to_string()
            }
            Self::Timeout(LoginStep::AwaitingCode) => {
                "<b>OTP verification timed out. Please try again.</b>".to_string()
            }
            Self::Timeout(LoginStep::AwaitingPassword) => {
                "<b>2FA verification timed out. Please try again.</b>".to_string()
            }
            Self::Timeout(_) => "<b>Login process timed out. Please try again.</b>".to_string(),
            Self::Cancelled => "<b>Process cancelled!</b>".to_string(),
            Self::InvalidPhoneFormat => "<b>Invalid phone number format. Please include \
country code with + sign.</b>"
                .to_string(),
            Self::Rejected(RemoteAuthError::PhoneInvalid) => "<b>Phone number is invalid. \
Please check the number and try again.</b>"
                .to_string(),
            Self::Rejected(RemoteAuthError::CodeInvalid) => {
                "<b>OTP is invalid. Please restart the login process with /login.</b>".to_string()
            }
            Self::Rejected(RemoteAuthError::CodeExpired) => {
                "<b>OTP is expired. Please restart the login process.</b>".to_string()
            }
            Self::Rejected(RemoteAuthError::PasswordInvalid) => {
                "<b>Invalid password provided. Please restart the login process.</b>".to_string()
            }
            Self::Rejected(RemoteAuthError::SignUpRequired) => "<b>This phone number has no \
account yet. Sign up in an official app first.</b>"
                .to_string(),
            Self::Rejected(other) => {
                format!("<b>ERROR during login process:</b> {}", code(&other.to_string()))
            }
            Self::ExportInvalid => "<b>Invalid session string. Please try again.</b>".to_string(),
            Self::StoreWrite(detail) => {
                format!("<b>ERROR saving session to database:</b> {}", code(detail))
            }
            Self::Transport {
                step: LoginStep::SendingCode,
                detail,
            } => format!("<b>Error sending OTP:</b> {}", code(detail)),
            Self::Transport {
                step: LoginStep::AwaitingPassword,
                detail,
            } => format!("<b>Error verifying password:</b> {}", code(detail)),
            Self::Transport { detail, .. } => {
                format!("<b>ERROR during login process:</b> {}", code(detail))
            }
        }
    }
}

/// `+` followed by one or more ASCII digits.
pub fn is_valid_phone(s: &str) -> bool {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE
        .get_or_init(|| Regex::new(r"^\+[0-9]+$").expect("valid regex"))
        .is_match(s)
}

/// Strip all whitespace from a code typed as `1 2 3 4 5`.
pub fn normalize_code(reply: &str) -> String {
    reply.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_cancel(reply: &str) -> bool {
    reply.trim() == CANCEL_TOKEN
}

/// Static inputs of the flow.
#[derive(Clone, Debug)]
pub struct LoginSettings {
    pub enabled: bool,
    pub app: AppCredentials,
    pub timeouts: LoginTimeouts,
}

impl LoginSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            enabled: cfg.login_system,
            app: cfg.app.clone(),
            timeouts: cfg.login_timeouts,
        }
    }
}

/// One in-flight attempt. Dropped when the flow ends, whatever the outcome.
struct LoginAttempt {
    user: UserId,
    chat: ChatId,
    step: LoginStep,
    client: Box<dyn RemoteAuthClient>,
}

/// Marks a user as having a login in flight until dropped.
struct InFlight<'a> {
    users: &'a Mutex<HashSet<UserId>>,
    user: UserId,
}

impl<'a> InFlight<'a> {
    fn acquire(users: &'a Mutex<HashSet<UserId>>, user: UserId) -> Option<Self> {
        let mut set = users.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(user) {
            return None;
        }
        // Release the lock before the guard exists; its Drop takes it again.
        drop(set);
        Some(Self { users, user })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.users.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.user);
    }
}

/// Drives `/login` and `/logout` against the injected ports.
pub struct LoginService {
    pub(crate) settings: LoginSettings,
    pub(crate) store: Arc<dyn CredentialStore>,
    replies: Arc<dyn ReplyWaiter>,
    pub(crate) messenger: Arc<dyn MessagingPort>,
    connector: Arc<dyn RemoteAuthConnector>,
    in_flight: Mutex<HashSet<UserId>>,
}

impl LoginService {
    pub fn new(
        settings: LoginSettings,
        store: Arc<dyn CredentialStore>,
        replies: Arc<dyn ReplyWaiter>,
        messenger: Arc<dyn MessagingPort>,
        connector: Arc<dyn RemoteAuthConnector>,
    ) -> Self {
        Self {
            settings,
            store,
            replies,
            messenger,
            connector,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Run the flow and report the outcome to the user.
    ///
    /// Never fails: every error is rendered into the chat and logged.
    pub async fn run_login(&self, chat: ChatId, user: UserId) {
        let text = match self.login(chat, user).await {
            Ok(()) => {
                info!(user_id = %user, "login completed");
                LOGIN_SUCCESS.to_string()
            }
            Err(e) => {
                info!(user_id = %user, error = %e, "login ended without a session");
                e.user_message()
            }
        };
        // Notification is best effort; there is nobody else to tell.
        if let Err(e) = self.messenger.send_html(chat, &text).await {
            warn!(user_id = %user, error = %e, "failed to send login result");
        }
    }

    /// Run the flow. `Ok(())` means the session was stored.
    pub async fn login(&self, chat: ChatId, user: UserId) -> Result<(), LoginError> {
        if !self.settings.enabled {
            return Err(LoginError::Disabled);
        }

        match self.store.get_session(user).await {
            Ok(Some(_)) => return Err(LoginError::AlreadyLoggedIn),
            Ok(None) => {}
            Err(StoreError::Unavailable) => return Err(LoginError::StoreUnavailable),
            Err(e) => {
                warn!(user_id = %user, error = %e, "session lookup failed; treating as logged out");
            }
        }

        let _in_flight =
            InFlight::acquire(&self.in_flight, user).ok_or(LoginError::InProgress)?;

        info!(user_id = %user, "login started");
        let phone = self.ask_phone(chat).await?;

        let client = self
            .connector
            .connect(&self.settings.app)
            .await
            .map_err(|e| LoginError::remote(LoginStep::SendingCode, e))?;
        let mut attempt = LoginAttempt {
            user,
            chat,
            step: LoginStep::SendingCode,
            client,
        };

        let exported = self.authenticate(&mut attempt, &phone).await;

        // Teardown errors are ignored: the attempt is over either way.
        let LoginAttempt { client, step, .. } = attempt;
        if let Err(e) = client.disconnect().await {
            debug!(user_id = %user, ?step, error = %e, "ignoring disconnect failure");
        }

        let session = exported?;
        self.persist(user, &session).await
    }

    async fn ask_phone(&self, chat: ChatId) -> Result<String, LoginError> {
        let reply = self
            .ask(
                chat,
                LoginStep::AwaitingPhone,
                PHONE_PROMPT,
                self.settings.timeouts.phone,
            )
            .await?;
        let phone = reply.trim().to_string();
        if !is_valid_phone(&phone) {
            return Err(LoginError::InvalidPhoneFormat);
        }
        Ok(phone)
    }

    async fn authenticate(
        &self,
        attempt: &mut LoginAttempt,
        phone: &str,
    ) -> Result<String, LoginError> {
        let timeouts = self.settings.timeouts;

        self.notify(attempt.chat, SENDING_CODE).await;
        attempt
            .client
            .send_code(phone)
            .await
            .map_err(|e| LoginError::remote(attempt.step, e))?;
        debug!(user_id = %attempt.user, "login code sent");

        attempt.step = LoginStep::AwaitingCode;
        let reply = self
            .ask(attempt.chat, attempt.step, CODE_PROMPT, timeouts.code)
            .await?;
        let outcome = attempt
            .client
            .sign_in(&normalize_code(&reply))
            .await
            .map_err(|e| LoginError::remote(attempt.step, e))?;

        if outcome == SignInOutcome::PasswordRequired {
            attempt.step = LoginStep::AwaitingPassword;
            debug!(user_id = %attempt.user, "two-step password required");
            let password = self
                .ask(attempt.chat, attempt.step, PASSWORD_PROMPT, timeouts.password)
                .await?;
            attempt
                .client
                .check_password(&password)
                .await
                .map_err(|e| LoginError::remote(attempt.step, e))?;
        }

        attempt.step = LoginStep::Persisting;
        let session = attempt
            .client
            .export_session()
            .await
            .map_err(|e| LoginError::remote(attempt.step, e))?;
        if session.len() < MIN_SESSION_LEN {
            warn!(user_id = %attempt.user, len = session.len(), "exported session too short");
            return Err(LoginError::ExportInvalid);
        }
        Ok(session)
    }

    async fn persist(&self, user: UserId, session: &str) -> Result<(), LoginError> {
        let app = &self.settings.app;
        let write = |e: StoreError| LoginError::StoreWrite(e.to_string());
        self.store
            .set_session(user, Some(session))
            .await
            .map_err(write)?;
        self.store
            .set_app_id(user, Some(app.api_id))
            .await
            .map_err(write)?;
        self.store
            .set_app_hash(user, Some(&app.api_hash))
            .await
            .map_err(write)
    }

    async fn ask(
        &self,
        chat: ChatId,
        step: LoginStep,
        prompt: &str,
        timeout: std::time::Duration,
    ) -> Result<String, LoginError> {
        let reply = self
            .replies
            .ask(chat, prompt, timeout)
            .await
            .map_err(|e| LoginError::ask(step, e))?;
        if is_cancel(&reply) {
            return Err(LoginError::Cancelled);
        }
        Ok(reply)
    }

    async fn notify(&self, chat: ChatId, html: &str) {
        if self.messenger.capabilities().supports_chat_actions {
            let _ = self.messenger.send_chat_action(chat, ChatAction::Typing).await;
        }
        // Progress notices are informational only.
        if let Err(e) = self.messenger.send_html(chat, html).await {
            debug!(error = %e, "failed to send progress notice");
        }
    }
}
