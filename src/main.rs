use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use helper_dispatch::config::{Config, ServerSettings};
use helper_dispatch::dispatch::{BookingEvent, Dispatcher};
use helper_dispatch::models::{AssignRequest, GeoPoint};
use helper_dispatch::server::{DispatchServer, ServerConfig};
use helper_dispatch::storage::Stores;
use helper_dispatch::{metrics, seed};

#[derive(Parser)]
#[command(
    name = "helper-dispatch",
    version,
    about = "Assign the nearest qualified helper and escalate when they do not respond",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Register helpers from a JSON seed file
    Seed {
        /// Seed file path
        file: PathBuf,
    },

    /// Show ranked candidates without claiming anyone
    Rank {
        /// Requested service (skill tag)
        #[arg(short, long)]
        service: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },

    /// Request a helper
    Assign {
        /// Requested service (skill tag)
        #[arg(short, long)]
        service: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Free-text job description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Keep running and print escalation events until the booking settles
        #[arg(long, default_value = "false")]
        follow: bool,
    },

    /// Show a booking
    Booking {
        /// Booking id
        id: String,
    },

    /// Complete a booking
    Complete {
        /// Booking id
        id: String,

        /// Rating between 0 and 5
        #[arg(short, long)]
        rating: f64,
    },

    /// List helpers
    Helpers {
        /// Only helpers currently available
        #[arg(long, default_value = "false")]
        available: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    let stores = Stores::open(&config.storage).with_context(|| {
        format!("Failed to open {} store", config.storage.backend)
    })?;
    let dispatcher = Arc::new(Dispatcher::new(
        stores,
        config.escalation(),
        config.dispatch.event_capacity,
    ));

    match cli.command {
        Commands::Serve { port } => {
            let mut settings = config.server.clone();
            if let Some(port) = port {
                settings.port = port;
            }
            serve(dispatcher, settings).await?;
        }

        Commands::Seed { file } => {
            tracing::info!(file = %file.display(), "Starting seed command");
            let helpers = seed::read_seed_file(&file)?;
            let total = helpers.len();
            let stored = seed::seed_helpers(&dispatcher, helpers).await?;
            println!("Seeded {stored} of {total} helpers");
        }

        Commands::Rank { service, lat, lng } => {
            let request = AssignRequest::new(service, GeoPoint::new(lat, lng), "");
            let candidates = dispatcher.rank(&request).await?;
            if candidates.is_empty() {
                println!("No helpers available at the moment.");
            }
            for (i, c) in candidates.iter().enumerate() {
                println!(
                    "{:>2}. {:<20} {:>7.2} km  rating {:.1}  ({})",
                    i + 1,
                    c.name,
                    c.distance_km,
                    c.rating,
                    c.helper_id
                );
            }
        }

        Commands::Assign {
            service,
            lat,
            lng,
            description,
            follow,
        } => {
            let mut events = dispatcher.subscribe();
            let request = AssignRequest::new(service, GeoPoint::new(lat, lng), description);
            let outcome = dispatcher.assign_helper(&request).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            match (&outcome.booking_id, follow) {
                (Some(booking_id), true) => {
                    println!("Following booking {booking_id} (Ctrl-C to stop)");
                    loop {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => break,
                            received = events.recv() => {
                                let envelope = match received {
                                    Ok(envelope) => envelope,
                                    Err(RecvError::Lagged(_)) => continue,
                                    Err(RecvError::Closed) => break,
                                };
                                if envelope.event.booking_id() != booking_id {
                                    continue;
                                }
                                println!("{}", serde_json::to_string(&envelope)?);
                                if matches!(
                                    envelope.event,
                                    BookingEvent::Exhausted { .. } | BookingEvent::Completed { .. }
                                ) {
                                    break;
                                }
                            }
                        }
                    }
                }
                (Some(_), false) => {
                    tracing::info!("Escalation only runs while this process is alive; use --follow or serve");
                }
                (None, _) => {}
            }
            dispatcher.shutdown();
        }

        Commands::Booking { id } => {
            let booking = dispatcher.get_booking(&id).await?;
            println!("{}", serde_json::to_string_pretty(&booking)?);
        }

        Commands::Complete { id, rating } => {
            let receipt = dispatcher.complete_booking(&id, rating).await?;
            println!("{}", receipt.message);
        }

        Commands::Helpers { available } => {
            for helper in dispatcher.list_helpers(available).await? {
                println!(
                    "{:<38} {:<20} {:<9} rating {:.1}  [{}]  {}",
                    helper.id,
                    helper.name,
                    helper.status,
                    helper.rating,
                    helper.skills.join(", "),
                    helper.location
                );
            }
        }
    }

    Ok(())
}

async fn serve(dispatcher: Arc<Dispatcher>, settings: ServerSettings) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    // Bookings assigned by an earlier process or a one-shot CLI `assign`
    dispatcher.recover().await?;

    let server_config = ServerConfig::from_settings(&settings)?;
    let server = DispatchServer::new(server_config, dispatcher)?;
    tracing::info!("\n{}", server.info().display());

    server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        "helper_dispatch=debug,tower_http=debug,info".to_string()
    } else {
        format!("helper_dispatch={level},warn")
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
