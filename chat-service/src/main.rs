use chat_service::{chat_route, config::ServiceConfig, state::AppStateBuilder};
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;

    let state = match AppStateBuilder::new().connect(&config).await {
        Ok(builder) => builder.build()?,
        Err(e) => {
            tracing::error!("Failed to connect chat service backends: {:?}", e);
            return Err(e);
        }
    };

    let app = chat_route(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    tracing::info!("Chat service listening on {}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
