/// Core error type.
///
/// Adapter crates map their specific errors into this type so the bot can
/// report failures consistently. Flow-level failures have their own enums
/// (`LoginError`, `LogoutError`) because each carries a user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
