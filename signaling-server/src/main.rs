use std::sync::Arc;

use anyhow::Context;
use log::info;
use simplelog::{Config, TermLogger, TerminalMode};
use tokio::sync::watch;

use rtc_signal_server::config::ServerConfig;
use rtc_signal_server::routes::signaling_route;
use rtc_signal_server::rtc_engine::RtcEngineFactory;
use rtc_signal_server::signaling::SignalingContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    TermLogger::init(config.log_level, Config::default(), TerminalMode::Mixed)
        .context("failed to initialise logging")?;

    let (shutdown_tx, shutdown) = watch::channel(false);
    let ctx = SignalingContext {
        factory: Arc::new(RtcEngineFactory),
        engine_config: Arc::new(config.engine.clone()),
        negotiation_timeout: config.negotiation_timeout,
        track_observer: None,
        shutdown,
    };
    let routes = signaling_route(
        config.ws_path.clone(),
        Arc::new(config.allowed_origins.clone()),
        ctx,
    );

    let (address, server) =
        warp::serve(routes).try_bind_with_graceful_shutdown(config.address, async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for ctrl-c: {}", e);
            }
            info!("shutting down");
            let _ = shutdown_tx.send(true);
        })?;
    info!("signaling on ws://{}/{}", address, config.ws_path);
    server.await;
    Ok(())
}
