use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveTime, Timelike, Weekday};
use thiserror::Error;
use tokio::time::sleep;

use crate::booking::{BookedOrder, BookingError, BookingRequest};
use crate::browser::SessionError;
use crate::login::LoginOutcome;

/// Wall-clock source, injectable so the scheduling logic is testable
/// against fixed dates.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Anything that can execute one full login+booking attempt.
/// The production implementation is [`crate::bot::BookingBot`].
pub trait Attempt {
    async fn run(&self, request: &BookingRequest) -> Result<BookedOrder, AttemptError>;
}

/// Failure of one attempt, tagged so the controller — the only place where
/// retry-vs-abort decisions are made — can classify it.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("login failed: {0:?}")]
    Login(LoginOutcome),

    #[error("bad username or password")]
    BadCredentials,

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl AttemptError {
    /// Retrying cannot fix these; the day's run aborts immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AttemptError::BadCredentials
                | AttemptError::Booking(BookingError::UnknownVenueItem { .. })
                | AttemptError::Booking(BookingError::InvalidStartHour(_))
        )
    }
}

/// What to book; the target date is derived per day from the weekday table.
#[derive(Debug, Clone)]
pub struct BookingPlan {
    pub venue: String,
    pub item: String,
    pub start_hour: u8,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_interval: Duration::from_secs(50),
        }
    }
}

/// Final state of one day's run. One attempt result is retained at a time;
/// `Failed` carries the last failure reason.
#[derive(Debug)]
pub enum DayOutcome {
    /// Not a booking day; zero attempts performed.
    Skipped,
    Booked(BookedOrder),
    /// All attempts spent without success.
    Failed(String),
    /// Fatal error; retries would not have helped.
    Aborted(String),
}

/// Booking days and how far ahead each books. Slots open exactly one week
/// out, so eligible weekdays book the same weekday next week.
pub fn booking_day_offset(weekday: Weekday) -> Option<u64> {
    match weekday {
        Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Fri => Some(7),
        _ => None,
    }
}

/// Run one day: check eligibility, compute the target date, and drive the
/// bounded attempt loop.
pub async fn run_booking_day<C: Clock, A: Attempt>(
    clock: &C,
    runner: &A,
    plan: &BookingPlan,
    policy: &RetryPolicy,
) -> DayOutcome {
    let today = clock.now().date_naive();
    let Some(offset) = booking_day_offset(today.weekday()) else {
        tracing::info!("today ({:?}) is not a booking day, skipping", today.weekday());
        return DayOutcome::Skipped;
    };

    let request = BookingRequest {
        venue: plan.venue.clone(),
        item: plan.item.clone(),
        date: today + Days::new(offset),
        start_hour: plan.start_hour,
    };
    run_attempts(runner, &request, policy).await
}

/// Bounded attempt loop: fresh session per attempt (the runner's job),
/// fixed backoff between failures, immediate stop on success or fatal error.
pub async fn run_attempts<A: Attempt>(
    runner: &A,
    request: &BookingRequest,
    policy: &RetryPolicy,
) -> DayOutcome {
    tracing::info!(
        "booking {} ({} attempt budget)",
        request.summary(),
        policy.max_attempts
    );

    let mut last_failure = String::new();
    for attempt in 1..=policy.max_attempts {
        tracing::info!("attempt {attempt}/{}", policy.max_attempts);
        match runner.run(request).await {
            Ok(order) => {
                tracing::info!("booked on attempt {attempt}: {}", request.summary());
                return DayOutcome::Booked(order);
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("attempt {attempt} failed fatally: {e}");
                return DayOutcome::Aborted(e.to_string());
            }
            Err(e) => {
                tracing::error!("attempt {attempt} failed: {e}");
                last_failure = e.to_string();
                if attempt < policy.max_attempts {
                    tracing::info!("retrying in {:?}", policy.retry_interval);
                    sleep(policy.retry_interval).await;
                }
            }
        }
    }

    tracing::error!(
        "all {} attempts failed, giving up for today",
        policy.max_attempts
    );
    DayOutcome::Failed(last_failure)
}

/// Coarse poll cadence of the service loop.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Whether the daily run should fire now: inside the 12:00-12:05 window
/// and not already run today. Firing twice on the same day is prevented
/// here, not by the booking-day logic.
fn should_fire(time: NaiveTime, today: NaiveDate, last_run: Option<NaiveDate>) -> bool {
    time.hour() == 12 && time.minute() < 5 && last_run != Some(today)
}

/// Periodic scheduler: wakes every 30s and triggers the daily
/// eligibility+attempt sequence once per day inside the noon window.
pub async fn run_service<C: Clock, A: Attempt>(
    clock: &C,
    runner: &A,
    plan: &BookingPlan,
    policy: &RetryPolicy,
) {
    let mut last_run: Option<NaiveDate> = None;
    loop {
        let now = clock.now();
        if should_fire(now.time(), now.date_naive(), last_run) {
            last_run = Some(now.date_naive());
            let outcome = run_booking_day(clock, runner, plan, policy).await;
            tracing::info!("daily run finished: {outcome:?}");
        }
        sleep(POLL_INTERVAL).await;
    }
}
