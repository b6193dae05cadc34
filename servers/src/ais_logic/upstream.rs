use crate::ais_logic::config::RelayConfig;
use crate::ais_logic::state::AppState;
use lib_relay::core::UpstreamConnector;
use lib_relay::ingestors::AisStreamTransport;
use std::sync::Arc;
use tokio::sync::broadcast;

pub async fn run(config: RelayConfig, app_state: AppState, shutdown: broadcast::Receiver<()>) {
    let connector = UpstreamConnector::new(
        config.upstream_url,
        Arc::new(AisStreamTransport),
        Arc::new(config.filter),
        config.api_key,
        app_state.dispatcher,
        config.reconnect_delay,
    )
    .with_connect_timeout(config.connect_timeout);

    connector.run(shutdown).await;
    log::info!("Upstream task finished.");
}
