//! Fakes for the core ports, shared by the flow tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use crate::{
    auth::{RemoteAuthClient, RemoteAuthConnector, RemoteAuthError, SignInOutcome, UserSession},
    config::LoginTimeouts,
    domain::{AppCredentials, ChatId, MessageId, MessageRef, UserId, UserRecord},
    login::{LoginService, LoginSettings, MIN_SESSION_LEN},
    messaging::{
        port::MessagingPort,
        replies::{AskError, ReplyWaiter},
        types::{ChatAction, MessagingCapabilities},
    },
    store::{CredentialStore, StoreError, StoreResult},
    Result,
};

pub fn valid_session() -> String {
    "s".repeat(MIN_SESSION_LEN + 10)
}

pub fn settings() -> LoginSettings {
    LoginSettings {
        enabled: true,
        app: AppCredentials {
            api_id: 4242,
            api_hash: "app-hash".to_string(),
        },
        timeouts: LoginTimeouts::default(),
    }
}

pub fn service(
    store: Arc<dyn CredentialStore>,
    replies: Arc<ScriptedReplies>,
    messenger: Arc<FakeMessenger>,
    connector: Arc<FakeConnector>,
) -> LoginService {
    LoginService::new(settings(), store, replies, messenger, connector)
}

#[derive(Default)]
pub struct FakeMessenger {
    pub sends: Mutex<Vec<(ChatId, String)>>,
}

impl FakeMessenger {
    pub fn last(&self) -> Option<String> {
        self.sends.lock().unwrap().last().map(|(_, s)| s.clone())
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_chat_actions: true,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let mut sends = self.sends.lock().unwrap();
        sends.push((chat_id, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sends.len() as i32),
        })
    }

    async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }
}

/// Replies in order; `None` means the user never answered.
pub struct ScriptedReplies {
    script: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReplies {
    pub fn new(script: &[Option<&str>]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().map(|s| s.map(str::to_string)).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyWaiter for ScriptedReplies {
    async fn ask(
        &self,
        _chat_id: ChatId,
        prompt_html: &str,
        _timeout: Duration,
    ) -> std::result::Result<String, AskError> {
        self.prompts.lock().unwrap().push(prompt_html.to_string());
        match self.script.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            Some(None) | None => Err(AskError::Timeout),
        }
    }
}

/// First `ask` blocks until `release`; later asks time out immediately.
pub struct GatedReplies {
    asked: Notify,
    tx: Mutex<Option<oneshot::Sender<String>>>,
    rx: tokio::sync::Mutex<Option<oneshot::Receiver<String>>>,
}

impl Default for GatedReplies {
    fn default() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            asked: Notify::new(),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }
}

impl GatedReplies {
    pub async fn wait_until_asked(&self) {
        self.asked.notified().await;
    }

    pub fn release(&self, reply: &str) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(reply.to_string());
        }
    }
}

#[async_trait]
impl ReplyWaiter for GatedReplies {
    async fn ask(
        &self,
        _chat_id: ChatId,
        _prompt_html: &str,
        _timeout: Duration,
    ) -> std::result::Result<String, AskError> {
        let rx = self.rx.lock().await.take();
        match rx {
            Some(rx) => {
                self.asked.notify_one();
                rx.await.map_err(|_| AskError::Superseded)
            }
            None => Err(AskError::Timeout),
        }
    }
}

/// Canned results for each remote step.
#[derive(Clone, Debug)]
pub struct ClientScript {
    pub send_code: std::result::Result<(), RemoteAuthError>,
    pub sign_in: std::result::Result<SignInOutcome, RemoteAuthError>,
    pub check_password: std::result::Result<(), RemoteAuthError>,
    pub export: std::result::Result<String, RemoteAuthError>,
    pub disconnect: std::result::Result<(), RemoteAuthError>,
}

impl Default for ClientScript {
    fn default() -> Self {
        Self {
            send_code: Ok(()),
            sign_in: Ok(SignInOutcome::Authorized),
            check_password: Ok(()),
            export: Ok(valid_session()),
            disconnect: Ok(()),
        }
    }
}

pub struct FakeConnector {
    script: ClientScript,
    connect_error: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new(script: ClientScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            connect_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn failing(detail: &str) -> Arc<Self> {
        Arc::new(Self {
            script: ClientScript::default(),
            connect_error: Some(detail.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct FakeClient {
    script: ClientScript,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeClient {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteAuthClient for FakeClient {
    async fn send_code(&mut self, phone: &str) -> std::result::Result<(), RemoteAuthError> {
        self.record(format!("send_code {phone}"));
        self.script.send_code.clone()
    }

    async fn sign_in(
        &mut self,
        code: &str,
    ) -> std::result::Result<SignInOutcome, RemoteAuthError> {
        self.record(format!("sign_in {code}"));
        self.script.sign_in.clone()
    }

    async fn check_password(&mut self, password: &str) -> std::result::Result<(), RemoteAuthError> {
        self.record(format!("check_password {password}"));
        self.script.check_password.clone()
    }

    async fn export_session(&mut self) -> std::result::Result<String, RemoteAuthError> {
        self.record("export".to_string());
        self.script.export.clone()
    }

    async fn disconnect(self: Box<Self>) -> std::result::Result<(), RemoteAuthError> {
        self.record("disconnect".to_string());
        self.script.disconnect.clone()
    }
}

struct FakeUserSession(Option<String>);

#[async_trait]
impl UserSession for FakeUserSession {
    async fn whoami(&self) -> std::result::Result<Option<String>, RemoteAuthError> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl RemoteAuthConnector for FakeConnector {
    async fn connect(
        &self,
        _app: &AppCredentials,
    ) -> std::result::Result<Box<dyn RemoteAuthClient>, RemoteAuthError> {
        if let Some(detail) = &self.connect_error {
            return Err(RemoteAuthError::Transport(detail.clone()));
        }
        self.calls.lock().unwrap().push("connect".to_string());
        Ok(Box::new(FakeClient {
            script: self.script.clone(),
            calls: self.calls.clone(),
        }))
    }

    async fn restore(
        &self,
        _app: &AppCredentials,
        session: &str,
    ) -> std::result::Result<Box<dyn UserSession>, RemoteAuthError> {
        Ok(Box::new(FakeUserSession(
            (!session.is_empty()).then(|| "Shared Account".to_string()),
        )))
    }
}

/// Reads succeed with nothing stored; every write fails.
#[derive(Default)]
pub struct FailingWrites;

#[async_trait]
impl CredentialStore for FailingWrites {
    async fn add_user(&self, _id: UserId, _name: &str) -> StoreResult<()> {
        Err(disk_full())
    }

    async fn record_exists(&self, _id: UserId) -> StoreResult<bool> {
        Ok(false)
    }

    async fn count_all(&self) -> StoreResult<u64> {
        Ok(0)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(Vec::new())
    }

    async fn delete_user(&self, _id: UserId) -> StoreResult<u64> {
        Err(disk_full())
    }

    async fn get_session(&self, _id: UserId) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set_session(&self, _id: UserId, _session: Option<&str>) -> StoreResult<()> {
        Err(disk_full())
    }

    async fn get_app_id(&self, _id: UserId) -> StoreResult<Option<i32>> {
        Ok(None)
    }

    async fn set_app_id(&self, _id: UserId, _app_id: Option<i32>) -> StoreResult<()> {
        Err(disk_full())
    }

    async fn get_app_hash(&self, _id: UserId) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set_app_hash(&self, _id: UserId, _app_hash: Option<&str>) -> StoreResult<()> {
        Err(disk_full())
    }
}

fn disk_full() -> StoreError {
    StoreError::Backend("disk full".to_string())
}
