use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use field_trip_lib::{
    comms::ServerEvent,
    history::HistoryRange,
    trip::{StartTripRequest, Trip},
};
use field_tracker::{
    api::{HttpTripApi, TripApi},
    config::TrackerConfig,
    gpsd::GpsdPositionSource,
    history::HistoryReconstructor,
    realtime::{RealtimeChannel, WsRealtimeChannel},
    sampler::{current_fix, PositionSource},
    TripManager,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FIX_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "field-tracker")]
#[command(about = "Tracks field trips from a gpsd receiver", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing keys keep their defaults
    #[arg(short, long, default_value = "tracker.json")]
    config: PathBuf,

    #[arg(long)]
    server_url: Option<String>,

    #[arg(long)]
    user_id: Option<i64>,

    #[arg(long, env = "FIELD_TRACKER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a trip, or resume the one left active, and track it until Ctrl-C
    Track {
        purpose: String,
        #[arg(long)]
        objective: Option<String>,
        #[arg(long)]
        vehicle: Option<String>,
        #[arg(long)]
        estimated_km: Option<f64>,
        /// End a trip left active by a previous run instead of resuming it
        #[arg(long)]
        terminate: bool,
    },
    /// End the active trip at the current position
    End {
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print completed trips with their timelines
    History {
        #[arg(value_enum, default_value_t = Range::Today)]
        range: Range,
    },
    /// Print the positions of the other members of the tracking room
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum Range {
    Today,
    Week,
    Month,
}

impl From<Range> for HistoryRange {
    fn from(range: Range) -> Self {
        match range {
            Range::Today => HistoryRange::Today,
            Range::Week => HistoryRange::Last7Days,
            Range::Month => HistoryRange::Last30Days,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let api: Arc<dyn TripApi> = Arc::new(HttpTripApi::new(&config.server_url, &config.token)?);
    let channel: Arc<dyn RealtimeChannel> = Arc::new(WsRealtimeChannel::new(config.tracking_url(), config.backoff));
    let source: Arc<dyn PositionSource> = Arc::new(GpsdPositionSource::new(&config.gpsd_host, config.gpsd_port));

    match cli.command {
        Commands::Track { purpose, objective, vehicle, estimated_km, terminate } => {
            let manager = TripManager::new(api, channel, source.clone(), config);

            let trip = match manager.recover_on_startup().await? {
                Some(recovered) if terminate => {
                    let ended = manager.terminate_recovered(None, None).await?;
                    println!(
                        "Ended trip {} ({}) left active since {}: {:.2} km",
                        ended.trip_id,
                        recovered.purpose,
                        recovered.start_time.format("%d/%m/%Y %H:%M (UTC)"),
                        ended.distance_km.unwrap_or_default()
                    );
                    return Ok(());
                },
                Some(recovered) => {
                    println!("{}", resume_notice(&recovered));
                    manager.resume_recovered().await?
                },
                None => {
                    tracing::info!("Waiting for a position fix...");
                    let fix = current_fix(source.as_ref(), FIX_TIMEOUT).await?;

                    let mut request = StartTripRequest::new(purpose, fix.position);
                    request.objective = objective;
                    request.vehicle_type = vehicle;
                    request.estimated_km = estimated_km;
                    manager.start(request).await?
                },
            };
            println!("Tracking trip {} ({}), Ctrl-C to stop", trip.trip_id, trip.purpose);

            let mut snapshots = manager.subscribe();
            loop {
                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        if let Some(error) = &snapshot.sampler_error {
                            tracing::error!("Position source failed: {}", error);
                        }
                        print!(
                            "\r{:>8.0} m  {:>5} samples  {:>4} checkpoints  {:>4} min",
                            snapshot.distance_m,
                            snapshot.samples,
                            snapshot.checkpoints,
                            snapshot.elapsed.as_secs() / 60
                        );
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            println!();

            // The trip stays open on the server; `end` closes it.
            manager.stop_tracking().await?;
            println!("Stopped tracking trip {}", trip.trip_id);
        },
        Commands::End { notes } => {
            let manager = TripManager::new(api, channel, source, config);
            if manager.recover_on_startup().await?.is_none() {
                println!("No active trip");
                return Ok(());
            }

            let trip = manager.terminate_recovered(None, notes).await?;
            println!(
                "Ended trip {}: {:.2} km in {:.0} min",
                trip.trip_id,
                trip.distance_km.unwrap_or_default(),
                trip.duration_minutes.unwrap_or_default()
            );
        },
        Commands::History { range } => {
            let history = HistoryReconstructor::new(api);
            for trip in history.load(range.into(), Utc::now()).await? {
                println!(
                    "#{} {} {}: {:.2} km, {:.0} min, {} checkpoints, {} visits",
                    trip.trip.trip_id,
                    trip.trip.start_time.format("%d/%m/%Y %H:%M (UTC)"),
                    trip.trip.purpose,
                    trip.summary.distance_km,
                    trip.summary.duration_minutes,
                    trip.summary.checkpoint_count,
                    trip.visits.len()
                );
                for visit in &trip.visits {
                    println!("    {} {}", visit.timestamp.format("%H:%M"), visit.title);
                }
            }
        },
        Commands::Watch => {
            let mut events = channel.subscribe();
            channel.connect(config.user_id, &config.token).await?;
            channel.join_tracking_room().await?;

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(ServerEvent::PositionUpdate(peer)) => println!(
                            "{} user {} at {:.6}, {:.6} (±{:.0} m)",
                            peer.position.timestamp.format("%H:%M:%S"),
                            peer.user_id,
                            peer.position.latitude,
                            peer.position.longitude,
                            peer.position.accuracy
                        ),
                        Ok(ServerEvent::ActiveUsers(active)) => println!("Active users: {:?}", active.users),
                        Ok(ServerEvent::UserConnected(user)) => println!("User {} joined", user.user_id),
                        Ok(ServerEvent::UserDisconnected(user)) => println!("User {} left", user.user_id),
                        Err(RecvError::Lagged(skipped)) => tracing::warn!("Skipped {} room events", skipped),
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            channel.disconnect().await;
        },
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<TrackerConfig> {
    let mut config = if cli.config.exists() {
        TrackerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file at {:?}, using defaults", cli.config);
        TrackerConfig::default()
    };

    if let Some(server_url) = &cli.server_url {
        config.server_url = server_url.trim_end_matches('/').to_string();
    }
    if let Some(user_id) = cli.user_id {
        config.user_id = user_id;
    }
    if let Some(token) = &cli.token {
        config.token = token.clone();
    }

    config.validate().context("Invalid tracker configuration")?;
    if config.token.is_empty() {
        anyhow::bail!("No token configured. Set `token` in {:?} or FIELD_TRACKER_TOKEN", cli.config);
    }
    Ok(config)
}

fn resume_notice(trip: &Trip) -> String {
    format!(
        "Resuming trip {} ({}) left active since {}, the new trip details are ignored. Use --terminate to end it instead",
        trip.trip_id,
        trip.purpose,
        trip.start_time.format("%d/%m/%Y %H:%M (UTC)")
    )
}
