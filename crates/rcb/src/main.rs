use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rcb_core::{
    auth::restore_shared,
    config::Config,
    store::{CredentialStore, UnavailableCredentialStore},
};
use rcb_mtproto::MtprotoConnector;
use rcb_store::SqliteCredentialStore;

mod health;

#[tokio::main]
async fn main() -> Result<(), rcb_core::Error> {
    rcb_core::logging::init("rcb")?;

    let cfg = Arc::new(Config::load()?);

    // Bound before the database and platform connects, which may block.
    let shutdown = CancellationToken::new();
    health::spawn(cfg.port, shutdown.clone()).await?;

    // The bot still serves commands without a database; the flows report it.
    let store: Arc<dyn CredentialStore> = match SqliteCredentialStore::open(&cfg.db_uri).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "database connection failed; running without credential store");
            Arc::new(UnavailableCredentialStore)
        }
    };

    let connector = Arc::new(MtprotoConnector::new());
    let shared = restore_shared(connector.as_ref(), &cfg.app, &cfg.session_mode()).await;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    let result =
        rcb_telegram::router::run_polling(cfg, store, connector, shared, shutdown.clone()).await;
    shutdown.cancel();

    result.map_err(|e| rcb_core::Error::External(format!("telegram bot failed: {e}")))
}
