mod cli;

use std::net::SocketAddr;

use clap::Parser;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use formrelay::config::Config;
use formrelay::models::BlacklistReason;
use formrelay::submission::dispatch;
use formrelay::{crypto, db, sweep, worker};

use cli::{Cli, Commands, SenderAction};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::debug!("Migrations applied");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(pool, config).await,
        Commands::CreateClient { name } => create_client(&pool, &config, &name).await,
        Commands::Retry { submission_id } => retry(pool, config, submission_id).await,
        Commands::Sender { action } => sender(&pool, action).await,
    }
}

async fn serve(pool: PgPool, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting formrelay");

    let addr = SocketAddr::new(config.host, config.port);
    let worker_count = config.worker_count;
    let (app, state) = formrelay::build_app(pool, config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = worker::run_pool(state.clone(), shutdown_rx.clone(), worker_count)?;
    let scheduler = tokio::spawn(sweep::run_scheduler(state.clone(), shutdown_rx));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    let _ = tokio::task::spawn_blocking(move || workers.join()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn create_client(pool: &PgPool, config: &Config, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let access_key = crypto::generate_access_key();
    let sealed = crypto::encrypt(&access_key, &config.encryption_key)?;
    let client = db::clients::create(pool, name, &sealed).await?;

    println!("Client created: {}", client.name);
    println!("  id:         {}", client.id);
    println!("  access key: {access_key}");
    Ok(())
}

async fn retry(pool: PgPool, config: Config, submission_id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
    let submission = db::submissions::find_by_id(&pool, submission_id)
        .await?
        .ok_or_else(|| format!("Submission {submission_id} not found"))?;

    let (_, state) = formrelay::build_app(pool, config)?;
    let outcome = dispatch::redispatch(&state, &submission).await?;

    println!("Submission {submission_id}: {outcome:?}");
    Ok(())
}

async fn sender(pool: &PgPool, action: SenderAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SenderAction::Whitelist { email_address } => {
            let sender = db::senders::get_or_create(pool, &email_address).await?;
            db::senders::whitelist(pool, sender.id).await?;
            println!("Whitelisted {}", sender.email_address);
        }
        SenderAction::Blacklist { email_address } => {
            let sender = db::senders::get_or_create(pool, &email_address).await?;
            db::senders::blacklist(pool, sender.id, BlacklistReason::Manual).await?;
            println!("Blacklisted {}", sender.email_address);
        }
        SenderAction::Unblacklist { email_address } => {
            let sender = db::senders::find_by_email(pool, &email_address)
                .await?
                .ok_or_else(|| format!("No sender with address {email_address}"))?;
            db::senders::unblacklist(pool, sender.id).await?;
            println!("Unblacklisted {}", sender.email_address);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
