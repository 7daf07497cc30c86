use std::sync::Arc;

use tracing::{info, warn};

use rcb_core::{
    config::SessionMode,
    domain::{ChatId, UserId},
    formatting::{code, escape_html},
    messaging::types::TextMessage,
    store::StoreError,
};

use crate::router::AppState;

const HELP_TEXT: &str = "<b>Session Login Bot</b>\n\n\
<b>Commands:</b>\n\
/login - Log in with your account\n\
/logout - Forget your stored session\n\
/status - Show your login state\n\
/cancel - Abort a running login\n\
/help - Show this message";

const ADMIN_HELP: &str = "\n\n<b>Admin:</b>\n\
/stats - Number of registered users\n\
/purge &lt;user_id&gt; - Delete a user record";

const STORE_DOWN: &str = "<b>Database not available.</b>";

pub fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn help_text(is_admin: bool) -> String {
    if is_admin {
        format!("{HELP_TEXT}{ADMIN_HELP}")
    } else {
        HELP_TEXT.to_string()
    }
}

async fn send(state: &AppState, chat: ChatId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat, html).await {
        warn!(chat_id = chat.0, error = %e, "failed to send reply");
    }
}

/// First contact creates the user record. Best effort: a missing database
/// must not block `/start`.
async fn register(state: &AppState, msg: &TextMessage) {
    match state.store.add_user(msg.user_id, &msg.display_name).await {
        Ok(()) => {}
        Err(StoreError::Unavailable) => {}
        Err(e) => warn!(user_id = %msg.user_id, error = %e, "failed to register user"),
    }
}

pub async fn handle_command(state: Arc<AppState>, msg: TextMessage) {
    let (cmd, arg) = parse_command(&msg.text);
    let chat = msg.chat_id;
    let user = msg.user_id;
    let is_admin = state.cfg.is_admin(user.0);

    info!(user_id = %user, command = %cmd, "command received");
    register(&state, &msg).await;

    match cmd.as_str() {
        "start" | "help" => {
            let greeting = format!(
                "Hi <b>{}</b>!\n\n{}",
                escape_html(&msg.display_name),
                help_text(is_admin)
            );
            send(&state, chat, &greeting).await;
        }
        "login" => {
            // The flow waits for later messages of this chat, which the
            // dispatcher only delivers once this handler returns.
            let login = state.login.clone();
            tokio::spawn(async move { login.run_login(chat, user).await });
        }
        "logout" => state.login.run_logout(chat, user).await,
        "status" => {
            let text = status_text(&state, user).await;
            send(&state, chat, &text).await;
        }
        "cancel" => send(&state, chat, "Nothing to cancel.").await,
        "stats" if is_admin => {
            let text = stats(&state).await;
            send(&state, chat, &text).await;
        }
        "purge" if is_admin => {
            let text = purge(&state, &arg).await;
            send(&state, chat, &text).await;
        }
        _ => {
            let text = format!(
                "Unknown command {}. Send /help for the list of commands.",
                code(&format!("/{cmd}"))
            );
            send(&state, chat, &text).await;
        }
    }
}

async fn status_text(state: &AppState, user: UserId) -> String {
    match state.cfg.session_mode() {
        SessionMode::PerUser => match state.store.get_session(user).await {
            Ok(Some(_)) => "<b>✅ You are logged in.</b>".to_string(),
            Ok(None) => "<b>You are not logged in.</b> Use /login to log in.".to_string(),
            Err(StoreError::Unavailable) => STORE_DOWN.to_string(),
            Err(e) => {
                warn!(user_id = %user, error = %e, "session lookup failed");
                "<b>You are not logged in.</b> Use /login to log in.".to_string()
            }
        },
        SessionMode::Shared(_) => {
            let Some(shared) = &state.shared else {
                return "<b>Shared session could not be restored.</b>".to_string();
            };
            match shared.whoami().await {
                Ok(Some(name)) => format!(
                    "Using the shared account <b>{}</b>.",
                    escape_html(&name)
                ),
                Ok(None) => "<b>Shared session is no longer authorized.</b>".to_string(),
                Err(e) => format!("<b>Shared session error:</b> {}", code(&e.to_string())),
            }
        }
        SessionMode::Off => "<b>Login system is disabled on this bot.</b>".to_string(),
    }
}

async fn stats(state: &AppState) -> String {
    let counts = async {
        let total = state.store.count_all().await?;
        let users = state.store.list_users().await?;
        let logged_in = users.iter().filter(|u| u.is_logged_in()).count();
        Ok::<_, StoreError>((total, logged_in))
    };
    match counts.await {
        Ok((total, logged_in)) => {
            format!("<b>Registered users:</b> {total}\n<b>Logged in:</b> {logged_in}")
        }
        Err(StoreError::Unavailable) => STORE_DOWN.to_string(),
        Err(e) => format!("<b>Error:</b> {}", code(&e.to_string())),
    }
}

async fn purge(state: &AppState, arg: &str) -> String {
    let Ok(id) = arg.trim().parse::<i64>() else {
        return "Usage: /purge &lt;user_id&gt;".to_string();
    };
    match state.store.delete_user(UserId(id)).await {
        Ok(0) => format!("No record for {}.", code(&id.to_string())),
        Ok(_) => {
            info!(user_id = id, "user record purged");
            format!("Deleted record {}.", code(&id.to_string()))
        }
        Err(StoreError::Unavailable) => STORE_DOWN.to_string(),
        Err(e) => format!("<b>Error:</b> {}", code(&e.to_string())),
    }
}
