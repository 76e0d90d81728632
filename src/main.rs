use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use crowdstats::config::Config;
use crowdstats::credentials::{mask_token, now_millis, CredentialPool, PoolError};
use crowdstats::graph::{GraphApi, HttpGraphApi};
use crowdstats::poller::Collector;
use crowdstats::snapshots::SnapshotStore;

/// crowdstats: engagement leaderboards for monitored Facebook groups.
///
/// Polls each configured group's feed with tokens from a rotating pool and
/// ranks the most active posters and commenters.
#[derive(Parser)]
#[command(name = "crowdstats", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Poll every configured group in the foreground, without the web UI
    Run,

    /// Start the web frontend and the background poll loops
    #[cfg(feature = "web")]
    Serve {
        /// Port to listen on (default: 3000)
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },

    /// Show system status (DB, credential pool, monitored groups)
    Status,

    /// Manage the credential pool
    Tokens {
        #[command(subcommand)]
        action: TokensCommand,
    },
}

#[derive(Subcommand)]
enum TokensCommand {
    /// List pooled tokens in rotation order
    List,

    /// Add a token by hand (normally tokens arrive through Facebook login)
    Add {
        /// The access token
        token: String,

        /// Display name of the account that owns the token
        #[arg(long, default_value = "manual")]
        name: String,

        /// Days until the token expires (default: 60)
        #[arg(long, default_value = "60")]
        expires_in_days: u32,
    },

    /// Remove a token
    Delete {
        /// The full access token
        token: String,
    },

    /// Remove every token
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crowdstats=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing crowdstats database...");
            let config = Config::load()?;
            let store = crowdstats::db::initialize(&config.db_path)?;
            let table_count = store.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\ncrowdstats is ready. Next steps:");
            println!("  1. Set up your .env file (see .env.example for required variables)");
            println!(
                "  2. List the groups to monitor in {}",
                config.crowds_file.display()
            );
            println!("\nThen run: cargo run -- serve");
        }

        Commands::Run => {
            let config = Config::load()?;
            let collector = build_collector(&config).await?;

            if collector.groups().is_empty() {
                println!("No groups configured in {}", config.crowds_file.display());
                return Ok(());
            }

            println!(
                "Polling {} groups. Press Ctrl-C to stop.",
                collector.groups().len()
            );
            let halted = collector.run().await;

            println!("\n{}", "All poll loops stopped.".bold());
            for (group, reason) in halted {
                println!("  {group}: {reason}");
            }
        }

        #[cfg(feature = "web")]
        Commands::Serve { port, bind } => {
            let config = Config::load()?;
            config.require_web()?;
            if config.admin_ids.is_empty() {
                warn!("CROWDSTATS_ADMIN_IDS is empty, /api/tokens will refuse every user");
            }
            let collector = Arc::new(build_collector(&config).await?);

            let spawned = collector.go();
            info!(spawned, "Poll loops started");

            crowdstats::web::run_server(Arc::new(config), collector, port, &bind).await?;
        }

        Commands::Status => {
            let config = Config::load()?;
            crowdstats::status::show(&config).await?;
        }

        Commands::Tokens { action } => {
            let config = Config::load()?;
            let pool = open_pool(&config).await?;

            match action {
                TokensCommand::List => {
                    let credentials = pool.list().await?;
                    if credentials.is_empty() {
                        println!("No tokens in the pool.");
                    } else {
                        println!("{} tokens in rotation order:", credentials.len());
                        crowdstats::status::print_credentials(&credentials);
                    }
                }

                TokensCommand::Add {
                    token,
                    name,
                    expires_in_days,
                } => {
                    let expires = now_millis() + i64::from(expires_in_days) * 86_400_000;
                    pool.put(token.trim(), &name, expires).await?;
                    println!(
                        "{} Added {} for {} ({} tokens in pool)",
                        "✓".green(),
                        mask_token(token.trim()),
                        name,
                        pool.count().await?
                    );
                }

                TokensCommand::Delete { token } => match pool.delete(token.trim()).await {
                    Ok(()) => println!("{} Removed {}", "✓".green(), mask_token(token.trim())),
                    Err(PoolError::NotFound(masked)) => {
                        println!("{} No token {} in the pool", "Warning:".yellow(), masked);
                    }
                    Err(e) => return Err(e.into()),
                },

                TokensCommand::Clear { yes } => {
                    let count = pool.count().await?;
                    if !yes {
                        println!(
                            "This removes all {count} tokens. Re-run with --yes to confirm."
                        );
                        return Ok(());
                    }
                    pool.clear().await?;
                    println!("{} Removed {count} tokens", "✓".green());
                }
            }
        }
    }

    Ok(())
}

/// Open the database and load the pool.
async fn open_pool(config: &Config) -> Result<Arc<CredentialPool>> {
    let store = crowdstats::db::open(&config.db_path)?;
    let pool = Arc::new(CredentialPool::new(store));
    pool.load()
        .await
        .context("Failed to load the credential pool")?;
    Ok(pool)
}

/// Preflight plus everything the poll loops need: config check, crowds
/// file, pool, Graph client.
async fn build_collector(config: &Config) -> Result<Collector> {
    let crowds = config.load_crowds()?;
    let groups = crowds.groups()?;
    let pool = open_pool(config).await?;

    if pool.count().await? == 0 {
        warn!("No Facebook tokens in the pool");
        println!("#");
        println!("# No Facebook access tokens found!");
        println!("# Polling starts after someone logs in with Facebook from the web UI");
        println!("# (or after `crowdstats tokens add`).");
        println!("#");
    }

    let api: Arc<dyn GraphApi> = Arc::new(HttpGraphApi::new(
        &config.graph_url,
        &config.graph_version,
        config.http_timeout,
    )?);

    Ok(Collector::new(
        groups,
        pool,
        Arc::new(SnapshotStore::new()),
        api,
    ))
}
