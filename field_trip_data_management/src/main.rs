use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use field_trip_data_management::{generate_token, hash_token, DataManager};
use field_trip_lib::trip::TripFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "FieldTripCLI")]
#[command(about = "A CLI for manual trip data operations", long_about = None)]
struct Cli {
    /// Database file. Defaults to data/database.db under the project root
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user and print its bearer token. A token is generated if none is given
    AddUser { name: String, token: Option<String> },
    /// List the trips of a user, newest first
    List { user_id: i64 },
    /// Write a trip as GPX to stdout
    ExportGpx { user_id: i64, trip_id: i64 },
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

    let data_manager = DataManager::start(cli.database.as_deref()).await?;

    match cli.command {
        Commands::AddUser { name, token } => {
            let token = token.unwrap_or_else(generate_token);
            let user = data_manager.register_user(&name, &hash_token(&token), Utc::now()).await?;
            println!("{}\t{}\t{}", user.user_id, user.user_name, token);
        },
        Commands::List { user_id } => {
            for trip in data_manager.get_trips(user_id, &TripFilter::default()).await? {
                let distance = trip.distance_km.map(|km| format!("{:.2} km", km)).unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    trip.trip_id,
                    trip.status,
                    trip.start_time.format("%d/%m/%Y %H:%M (UTC)"),
                    distance,
                    trip.purpose
                );
            }
        },
        Commands::ExportGpx { user_id, trip_id } => {
            print!("{}", data_manager.export_gpx(user_id, trip_id).await?);
        },
    }

    data_manager.close().await;
    Ok(())
}
