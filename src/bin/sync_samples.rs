use std::env;
use std::path::Path;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use grasp_backend::config::AppConfig;
use grasp_backend::db;
use grasp_backend::mcm::McmClient;
use grasp_backend::sync::samples::SampleUpdater;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = parse_args()?;
    init_tracing(args.debug);

    let mut config = AppConfig::from_env()?;
    if let Some(path) = &args.db_auth {
        config.load_db_credentials(Path::new(path))?;
    }
    let mcm_url = if args.dev {
        &config.mcm_dev_url
    } else {
        &config.mcm_url
    };
    tracing::info!(
        component = "sync-samples",
        database_url = %config.redacted_database_url(),
        mcm_url = %mcm_url,
        dev = args.dev,
        "loaded configuration"
    );

    let pool = db::init_pool(&config.database_url, 1)?;
    let mcm = McmClient::new(mcm_url, config.mcm_cookie.clone(), args.debug);
    let mut conn = pool.get().context("failed to get database connection")?;
    SampleUpdater::new(&mcm).run(&mut conn).await?;
    Ok(())
}

#[derive(Default)]
struct Args {
    dev: bool,
    debug: bool,
    db_auth: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dev" => parsed.dev = true,
            "--debug" => parsed.debug = true,
            "--db_auth" => {
                parsed.db_auth = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--db_auth needs a value"))?,
                );
            }
            other => {
                eprintln!("Unknown argument: {other}\nUsage: sync_samples [--dev] [--debug] [--db_auth FILE]");
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
