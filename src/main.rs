use std::net::SocketAddr;
use std::sync::Arc;

use ytlink::config::Config;
use ytlink::server::{self, AppState};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env().expect("invalid configuration");

    let state = Arc::new(AppState::new(config));

    // The downloader is a hard requirement for streaming and for ytdl
    // redirection; refuse to start without it.
    if state.config.needs_downloader() {
        state
            .ytdl
            .probe()
            .await
            .expect("downloader command is not installed or cannot be found");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("could not bind listening socket");

    log::info!(
        "listening on {} (strategy: {:?}, client ip: {}, streaming: {})",
        addr,
        state.config.strategy,
        state.config.use_client_ip,
        state.config.stream_key.is_some(),
    );

    axum::serve(
        listener,
        server::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server exited with error");
}
