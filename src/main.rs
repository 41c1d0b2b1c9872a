mod booking;
mod bot;
mod browser;
mod captcha;
mod config;
mod login;
mod notify;
mod schedule;
mod venues;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Days, Local};
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::booking::BookingRequest;
use crate::bot::BookingBot;
use crate::browser::ChromeFactory;
use crate::captcha::HttpOcr;
use crate::config::Config;
use crate::notify::ServerChan;
use crate::schedule::{BookingPlan, DayOutcome, RetryPolicy, SystemClock};
use crate::venues::VenueTable;

const DEFAULT_VENUE: &str = "学生服务中心";
const DEFAULT_ITEM: &str = "学生中心健身房";
const DEFAULT_HOUR: u8 = 17;
const DEFAULT_DAY_OFFSET: u8 = 7;

#[derive(Parser, Debug)]
#[command(name = "venuebot", version, about = "Automated sports-venue slot booking")]
struct Cli {
    /// Venue name to book
    #[arg(short = 'v', long)]
    venue: Option<String>,

    /// Venue item (court/room) within the venue
    #[arg(short = 'i', long)]
    item: Option<String>,

    /// Start hour of the slot
    #[arg(short = 't', long = "time", value_parser = clap::value_parser!(u8).range(7..=21))]
    start_hour: Option<u8>,

    /// Days ahead of today to book (only with --once; the daily schedule
    /// derives this from the weekday table)
    #[arg(short = 'd', long = "day", value_parser = clap::value_parser!(u8).range(0..=7))]
    day_offset: Option<u8>,

    /// Book right now instead of waiting for the daily schedule
    #[arg(long)]
    once: bool,

    /// Print the venue/item lookup table and exit
    #[arg(long)]
    list_venues: bool,
}

/// Parse the CLI with the venue table appended to `--help`.
fn parse_cli(venues: &VenueTable) -> Cli {
    let command = Cli::command().after_help(format!("Venue/item table:\n{}", venues.render()));
    let matches = command.get_matches();
    Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

/// Console output plus an append-only log file.
fn init_logging(log_file: &str) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {log_file}"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,chromiumoxide::conn=off,chromiumoxide::handler=off")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let venues = VenueTable::default();
    let cli = parse_cli(&venues);

    if cli.list_venues {
        println!("{}", venues.render());
        return Ok(());
    }

    let config = Config::from_env().context("failed to load configuration")?;
    init_logging(&config.log_file)?;

    let plan = BookingPlan {
        venue: cli.venue.unwrap_or_else(|| DEFAULT_VENUE.into()),
        item: cli.item.unwrap_or_else(|| DEFAULT_ITEM.into()),
        start_hour: cli.start_hour.unwrap_or(DEFAULT_HOUR),
    };
    let policy = RetryPolicy::default();

    tracing::info!(
        "venuebot starting: {} / {} at {}:00",
        plan.venue,
        plan.item,
        plan.start_hour
    );

    let bot = BookingBot::new(
        ChromeFactory::new(config.clone()),
        HttpOcr::new(config.ocr_url.clone()),
        ServerChan::new(config.credentials.sc_key.clone()),
        config.credentials.clone(),
        venues,
        config.captcha_debug_dir.clone().map(PathBuf::from),
    );

    if cli.once {
        let offset = cli.day_offset.unwrap_or(DEFAULT_DAY_OFFSET);
        let request = BookingRequest {
            venue: plan.venue,
            item: plan.item,
            date: Local::now().date_naive() + Days::new(offset as u64),
            start_hour: plan.start_hour,
        };
        match schedule::run_attempts(&bot, &request, &policy).await {
            DayOutcome::Booked(_) => Ok(()),
            outcome => {
                tracing::error!("booking failed: {outcome:?}");
                std::process::exit(1);
            }
        }
    } else {
        tracing::info!("service mode: daily check at 12:00, polling every 30s");
        schedule::run_service(&SystemClock, &bot, &plan, &policy).await;
        Ok(())
    }
}
