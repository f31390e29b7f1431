use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use grasp_backend::auth::jwt::{SessionService, TokenVerifier};
use grasp_backend::auth::oidc::OidcClient;
use grasp_backend::auth::roles::RoleCache;
use grasp_backend::config::AppConfig;
use grasp_backend::db;
use grasp_backend::routes;
use grasp_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = parse_args()?;
    init_tracing(args.debug);

    let mut config = AppConfig::from_env()?;
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(path) = args.db_auth {
        config.load_db_credentials(Path::new(&path))?;
    }

    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        oidc_enabled = config.oidc.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool(&config.database_url, config.database_max_pool_size)?;
    let sessions = SessionService::new(&config.session_secret, config.session_token_expiry_minutes);
    let roles = RoleCache::new(Duration::from_secs(config.user_cache_ttl_secs));
    let (verifier, oidc) = match config.oidc.clone() {
        Some(settings) => {
            let audience = settings.client_id.clone();
            let client = OidcClient::new(settings);
            let keys = client.fetch_jwks().await?;
            (TokenVerifier::rs256(keys, &audience), Some(client))
        }
        None => {
            tracing::warn!("OIDC is not configured, only locally issued tokens are accepted");
            (TokenVerifier::hs256(&config.session_secret), None)
        }
    };

    let state = AppState::new(pool, config, sessions, verifier, oidc, roles);
    let listen_addr: SocketAddr =
        format!("{}:{}", state.config.server_host, state.config.server_port).parse()?;
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Default)]
struct Args {
    host: Option<String>,
    port: Option<u16>,
    debug: bool,
    db_auth: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => {
                parsed.host = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--host needs a value"))?,
                );
            }
            "--port" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--port needs a value"))?;
                parsed.port = Some(value.parse()?);
            }
            "--debug" => parsed.debug = true,
            "--db_auth" => {
                parsed.db_auth = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--db_auth needs a value"))?,
                );
            }
            other => {
                eprintln!("Unknown argument: {other}\nUsage: grasp-backend [--host HOST] [--port PORT] [--debug] [--db_auth FILE]");
                std::process::exit(1);
            }
        }
    }

    Ok(parsed)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
