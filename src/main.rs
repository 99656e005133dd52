use api_rest::AppState;
use api_shared::SessionDirectory;
use clinic_core::{
    AccessGate, AppointmentStore, CoreConfig, LifecycleManager, RestRowStore, StoreConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_IDENTITY_API_URL: &str = "https://api.clerk.com/v1";

/// Main entry point for the clinic application
///
/// Starts the REST server (configurable via CLINIC_REST_ADDR, default 0.0.0.0:3000).
///
/// Public routes are health and booking. Every other route requires an identity provider
/// session belonging to the configured admin email.
///
/// # Environment Variables
/// - `CLINIC_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `STORE_URL`, `STORE_API_KEY`: appointment store location and key
/// - `STORE_TABLE`: appointment table name (default: "appointments")
/// - `ADMIN_EMAIL`: the single email admitted to admin routes
/// - `IDENTITY_API_URL`: identity provider backend API (default: "https://api.clerk.com/v1")
/// - `IDENTITY_SECRET_KEY`: identity provider secret key
/// - `CONVERSATION_CONNECT_TIMEOUT_SECS`: voice agent connect timeout (default: 15)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration is invalid or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinic_run=info".parse()?)
                .add_directive("clinic_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CLINIC_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let store = StoreConfig::new(
        &require_env("STORE_URL")?,
        require_env("STORE_API_KEY")?,
        std::env::var("STORE_TABLE").ok(),
    )?;
    let cfg = CoreConfig::new(store, &require_env("ADMIN_EMAIL")?)?;

    let identity_api =
        std::env::var("IDENTITY_API_URL").unwrap_or_else(|_| DEFAULT_IDENTITY_API_URL.into());
    let sessions = SessionDirectory::new(&identity_api, require_env("IDENTITY_SECRET_KEY")?)?;

    let state = AppState::new(
        LifecycleManager::new(AppointmentStore::new(RestRowStore::new(cfg.store()))),
        AccessGate::new(cfg.authorized_email().clone()),
        sessions,
    );

    tracing::info!("++ Starting clinic REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, api_rest::router(state)).await?;

    Ok(())
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{name} must be set"))
}
