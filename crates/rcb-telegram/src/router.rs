use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, error_handlers::LoggingErrorHandler, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rcb_core::{
    auth::{RemoteAuthConnector, UserSession},
    config::Config,
    domain::ChatId,
    login::{LoginService, LoginSettings},
    messaging::{port::MessagingPort, replies::PendingReplies},
    store::CredentialStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<dyn CredentialStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub replies: Arc<PendingReplies>,
    pub login: Arc<LoginService>,
    /// Pre-provisioned account, present only in shared-session mode.
    pub shared: Option<Arc<dyn UserSession>>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn CredentialStore>,
        messenger: Arc<dyn MessagingPort>,
        connector: Arc<dyn RemoteAuthConnector>,
        shared: Option<Arc<dyn UserSession>>,
    ) -> Self {
        let replies = Arc::new(PendingReplies::new(messenger.clone()));
        let login = Arc::new(LoginService::new(
            LoginSettings::from_config(&cfg),
            store.clone(),
            replies.clone(),
            messenger.clone(),
            connector,
        ));
        Self {
            cfg,
            store,
            messenger,
            replies,
            login,
            shared,
        }
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<dyn CredentialStore>,
    connector: Arc<dyn RemoteAuthConnector>,
    shared: Option<Arc<dyn UserSession>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Basic startup info.
    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }
    info!(
        login_system = cfg.login_system,
        admins = cfg.admins.len(),
        "configuration loaded"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState::new(
        cfg.clone(),
        store,
        messenger.clone(),
        connector,
        shared,
    ));

    // Send startup notification (best-effort) to the first admin.
    if let Some(&admin) = cfg.admins.first() {
        let messenger = messenger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Err(e) = messenger
                .send_html(ChatId(admin), "<b>Bot Started Successfully!</b>")
                .await
            {
                warn!(error = %e, "startup notification failed");
            }
        });
    }

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .error_handler(LoggingErrorHandler::with_custom_text(
            "an error from the update handler",
        ))
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        if let Ok(done) = token.shutdown() {
            done.await;
        }
    });

    dispatcher.dispatch().await;
    info!("dispatcher stopped");
    Ok(())
}
