use std::{env, fs, path::Path, time::Duration};

use crate::{domain::AppCredentials, errors::Error, Result};

/// Typed configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub app: AppCredentials,
    pub admins: Vec<i64>,

    // Sessions
    pub string_session: Option<String>,
    pub login_system: bool,

    // Credential store
    pub db_uri: String,
    pub db_name: String,

    // Liveness endpoint
    pub port: u16,

    // Login flow timeouts
    pub login_timeouts: LoginTimeouts,
}

/// Per-step reply timeouts of the login flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginTimeouts {
    pub phone: Duration,
    pub code: Duration,
    pub password: Duration,
}

impl Default for LoginTimeouts {
    fn default() -> Self {
        Self {
            phone: Duration::from_secs(120),
            code: Duration::from_secs(300),
            password: Duration::from_secs(300),
        }
    }
}

/// How the bot obtains platform sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Users log in through `/login`; one stored session per user.
    PerUser,
    /// Login flow disabled; a single pre-provisioned session is shared.
    Shared(String),
    /// Login flow disabled and no shared session configured.
    Off,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required env vars
        let telegram_bot_token = get("BOT_TOKEN").ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let api_id = get("API_ID")
            .ok_or_else(|| Error::Config("API_ID environment variable is required".to_string()))?
            .trim()
            .parse::<i32>()
            .map_err(|e| Error::Config(format!("API_ID must be an integer: {e}")))?;
        let api_hash = get("API_HASH").ok_or_else(|| {
            Error::Config("API_HASH environment variable is required".to_string())
        })?;

        let admins = parse_csv_i64(get("ADMINS"));

        let string_session = get("STRING_SESSION").map(|s| s.trim().to_string());
        let login_system = get("LOGIN_SYSTEM").map(|s| parse_bool(&s)).unwrap_or(true);

        let db_name = get("DB_NAME").unwrap_or_else(|| "rcb".to_string());
        let db_uri = get("DB_URI").unwrap_or_else(|| format!("sqlite://{db_name}.db?mode=rwc"));

        let port = match get("PORT") {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("PORT must be a port number: {e}")))?,
            None => 10_000,
        };

        let defaults = LoginTimeouts::default();
        let secs = |key: &str, default: Duration| {
            get(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let login_timeouts = LoginTimeouts {
            phone: secs("LOGIN_PHONE_TIMEOUT_SECS", defaults.phone),
            code: secs("LOGIN_CODE_TIMEOUT_SECS", defaults.code),
            password: secs("LOGIN_PASSWORD_TIMEOUT_SECS", defaults.password),
        };

        Ok(Self {
            telegram_bot_token,
            app: AppCredentials {
                api_id,
                api_hash: api_hash.trim().to_string(),
            },
            admins,
            string_session,
            login_system,
            db_uri,
            db_name,
            port,
            login_timeouts,
        })
    }

    pub fn session_mode(&self) -> SessionMode {
        match (&self.string_session, self.login_system) {
            (_, true) => SessionMode::PerUser,
            (Some(s), false) => SessionMode::Shared(s.clone()),
            (None, false) => SessionMode::Off,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split([',', ' '])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
