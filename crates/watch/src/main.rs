//! `mediadeck-watch`: follows the backend job stream and logs job state.
//!
//! Connects to the event stream, keeps a reconciled job table, and logs
//! each job as it appears, progresses and leaves. Reconnects on its own
//! and resyncs from the jobs API after every reconnect. Runs until
//! Ctrl-C.
//!
//! # Environment variables
//!
//! | Variable                         | Default                 | Description                       |
//! |----------------------------------|-------------------------|-----------------------------------|
//! | `MEDIADECK_API_URL`              | `http://localhost:8080` | Jobs HTTP API base URL            |
//! | `MEDIADECK_WS_URL`               | derived from API URL    | Event stream endpoint             |
//! | `MEDIADECK_RECONNECT_DELAY_SECS` | `5`                     | Fixed delay between reconnects    |
//! | `MEDIADECK_RECONNECT_BACKOFF`    | unset                   | `1` for capped exponential backoff |
//! | `MEDIADECK_HISTORY_CAP`          | `50`                    | Dismissed jobs kept in history    |
//! | `MEDIADECK_CONNECT_TIMEOUT_SECS` | `10`                    | Bound on the connect handshake    |
//! | `MEDIADECK_PING_INTERVAL_SECS`   | `15`                    | Ping period, `0` disables         |
//! | `MEDIADECK_IDLE_TIMEOUT_SECS`    | `45`                    | Drop after this much silence, `0` disables |

use mediadeck_stream::{StreamConfig, SyncSession};
use mediadeck_watch::tracker::follow;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mediadeck_watch=info,mediadeck_stream=info,mediadeck_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StreamConfig::from_env()?;

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        reconnect = ?config.reconnect,
        liveness = ?config.liveness,
        history_cap = config.history_cap,
        "Starting mediadeck-watch",
    );

    let mut session = SyncSession::new(&config);
    if let Err(e) = session.resync().await {
        tracing::warn!(error = %e, "Initial job listing unavailable");
    }
    session.connect();

    let watcher = tokio::spawn(follow(session.store().clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    session.shutdown();
    watcher.abort();
    Ok(())
}
