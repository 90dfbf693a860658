use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use nightscout_client::{
    NightscoutClient, ScheduleKind, config::AppConfig, raw::parse_timestamp,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "nightscout-client")]
#[command(about = "Query a Nightscout server and resolve therapy profiles")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the therapy settings in effect at an instant
    Profile {
        /// RFC 3339 instant (defaults to now)
        #[arg(long)]
        at: Option<String>,
        /// Named profile instead of the definition's default
        #[arg(long)]
        profile: Option<String>,
    },
    /// Show recent sensor glucose values
    Sgv {
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("nightscout_client=debug");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(async {
        let client = NightscoutClient::from_config(&config.server, &config.network)?;
        tracing::info!("Using Nightscout server {}", client.server_url());

        match args.command {
            Command::Profile { at, profile } => {
                let instant = match at {
                    Some(at) => parse_timestamp(&at, "--at")?,
                    None => Utc::now(),
                };
                show_profile(&client, &config, instant, profile.as_deref()).await
            }
            Command::Sgv { count } => show_sgvs(&client, count).await,
        }
    })
}

async fn show_profile(
    client: &NightscoutClient,
    config: &AppConfig,
    instant: DateTime<Utc>,
    name: Option<&str>,
) -> Result<()> {
    let set = client.fetch_profiles(&[], &config.resolution).await?;
    let definition = set.active_definition_at(instant)?;
    let profile = match name {
        Some(name) => definition.profile_named(name)?,
        None => definition.default_profile()?,
    };

    let offset = profile.local_offset_of(instant);
    println!("Definition start: {}", definition.start_date());
    println!(
        "Profile:          {}",
        name.unwrap_or(definition.default_profile_name())
    );
    println!("Time zone:        {}", profile.time_zone_name());
    println!(
        "Local time:       {}",
        instant.with_timezone(&profile.time_zone()).format("%Y-%m-%d %H:%M:%S %Z")
    );
    println!(
        "Offset:           {:02}:{:02}",
        offset / 3600,
        (offset % 3600) / 60
    );
    println!("DIA:              {} h", profile.dia_hours());

    for kind in ScheduleKind::ALL {
        match profile.value_at(kind, instant) {
            Ok(value) => println!("{:<18}{}", format!("{kind}:"), value),
            Err(e) => tracing::debug!("Skipping {}: {}", kind, e),
        }
    }
    Ok(())
}

async fn show_sgvs(client: &NightscoutClient, count: u32) -> Result<()> {
    let count = count.to_string();
    let sgvs = client.fetch_sgvs(&[("count", count.as_str())]).await?;
    for sgv in sgvs {
        println!(
            "{}  {:>5} mg/dL  {:>4.1} mmol/L  {}",
            sgv.date.format("%Y-%m-%d %H:%M"),
            sgv.sgv,
            sgv.sgv_mmol,
            sgv.direction
        );
    }
    Ok(())
}
