use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::time::sleep;

use crate::browser::{PageWait, Session, SessionError};
use crate::venues::VenueTable;

// element-ui widgets on the portal's venue search page
pub(crate) const SEARCH_INPUT: &str = ".el-input__inner";
const SEARCH_BUTTON: &str = ".el-button--default";
pub(crate) const VENUE_CARD: &str = ".el-card__body";

// one seat row per bookable hour inside the day chart
pub(crate) const SEAT_ROWS: &str = ".chart .inner-seat-wrapper .clearfix";
pub(crate) const FREE_SEAT: &str = ".unselected-seat";

// order confirmation dialog chain
const CONFIRM_DRAWER: &str = ".drawerStyle>.butMoney>.is-round";
const TERMS_CHECKBOX: &str =
    ".dialog-footer>.tk>.el-checkbox>.el-checkbox__input>.el-checkbox__inner";
const TERMS_CONFIRM: &str = ".dialog-footer>div>.el-button--primary";
const PAY_BUTTON: &str = ".placeAnOrder>.right>.el-button--primary";
const FINAL_CONFIRM: &str = r#"[aria-label="提示"] .dialog-footer .el-button--primary"#;

pub const FIRST_HOUR: u8 = 7;
pub const LAST_HOUR: u8 = 21;

const STEP_TIMEOUT: Duration = Duration::from_secs(20);
const SETTLE: Duration = Duration::from_secs(1);

/// One booking target. Immutable once an attempt begins; the controller
/// resolves the weekday offset to a concrete date when it builds this.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub venue: String,
    pub item: String,
    pub date: NaiveDate,
    /// Desired start hour, 7..=21.
    pub start_hour: u8,
}

impl BookingRequest {
    pub fn summary(&self) -> String {
        format!(
            "{}-{} at {}:00 on {}",
            self.venue, self.item, self.start_hour, self.date
        )
    }
}

/// Proof of a committed order, echoed into logs and the notification.
#[derive(Debug, Clone)]
pub struct BookedOrder {
    pub venue: String,
    pub item: String,
    pub date: NaiveDate,
    pub start_hour: u8,
}

#[derive(Debug, Error)]
pub enum BookingError {
    /// Configuration error: the lookup table has no tab for this combination.
    #[error("unknown venue/item combination: {venue} / {item}")]
    UnknownVenueItem { venue: String, item: String },

    #[error("start hour {0} outside bookable range {FIRST_HOUR}-{LAST_HOUR}")]
    InvalidStartHour(u8),

    /// Expected condition, reported as such rather than as a general fault;
    /// the attempt-level controller decides whether to try again.
    #[error("no seats left in {venue}-{item} at {hour}:00 on {date}")]
    NoSeats {
        venue: String,
        item: String,
        hour: u8,
        date: NaiveDate,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Date tabs carry an id derived from the ISO date.
pub(crate) fn date_tab_selector(date: NaiveDate) -> String {
    format!("#tab-{}", date.format("%Y-%m-%d"))
}

/// Index into the list of seat rows, 0..=14 for hours 7..=21. Rows are
/// picked by position in the match list, not by DOM child position: the
/// wrapper may carry other children before the rows.
pub(crate) fn seat_row_index(start_hour: u8) -> usize {
    (start_hour - FIRST_HOUR) as usize
}

/// Drive the booking pipeline on an authenticated session. Linear, no
/// internal retries: any step failure aborts upward and the controller
/// restarts the whole attempt with a fresh session.
pub async fn book<S: Session>(
    session: &S,
    venues: &VenueTable,
    request: &BookingRequest,
) -> Result<BookedOrder, BookingError> {
    if !(FIRST_HOUR..=LAST_HOUR).contains(&request.start_hour) {
        return Err(BookingError::InvalidStartHour(request.start_hour));
    }
    let tab_id = venues
        .tab_id(&request.venue, &request.item)
        .ok_or_else(|| BookingError::UnknownVenueItem {
            venue: request.venue.clone(),
            item: request.item.clone(),
        })?;

    tracing::info!("searching venue: {}", request.venue);
    session
        .wait_until(&PageWait::ElementPresent(SEARCH_INPUT.into()), STEP_TIMEOUT)
        .await?;
    session.type_text(SEARCH_INPUT, &request.venue).await?;
    session.click(SEARCH_BUTTON).await?;
    sleep(SETTLE).await;

    session
        .wait_until(&PageWait::ElementPresent(VENUE_CARD.into()), STEP_TIMEOUT)
        .await?;
    session.click(VENUE_CARD).await?;
    sleep(SETTLE).await;

    tracing::info!("selecting venue item: {}", request.item);
    let tab_selector = format!("#{tab_id}");
    session
        .wait_until(&PageWait::ElementPresent(tab_selector.clone()), STEP_TIMEOUT)
        .await?;
    session.click(&tab_selector).await?;

    tracing::info!("selecting date: {}", request.date);
    let date_selector = date_tab_selector(request.date);
    session
        .wait_until(&PageWait::ElementPresent(date_selector.clone()), STEP_TIMEOUT)
        .await?;
    session.click(&date_selector).await?;
    sleep(SETTLE).await;

    tracing::info!("selecting time slot: {}:00", request.start_hour);
    let row = seat_row_index(request.start_hour);
    let available = session.count_in_nth(SEAT_ROWS, row, FREE_SEAT).await?;
    if available == 0 {
        return Err(BookingError::NoSeats {
            venue: request.venue.clone(),
            item: request.item.clone(),
            hour: request.start_hour,
            date: request.date,
        });
    }
    tracing::info!("{available} free seat(s), taking the first");
    session.click_in_nth(SEAT_ROWS, row, FREE_SEAT).await?;

    tracing::info!("confirming order");
    session.click(CONFIRM_DRAWER).await?;
    session.click(TERMS_CHECKBOX).await?;
    session.click(TERMS_CONFIRM).await?;
    sleep(SETTLE).await;
    session.click(PAY_BUTTON).await?;
    session.click(FINAL_CONFIRM).await?;

    let order = BookedOrder {
        venue: request.venue.clone(),
        item: request.item.clone(),
        date: request.date,
        start_hour: request.start_hour,
    };
    tracing::info!("order committed: {}", request.summary());
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{nth_scope, FakeSession, FakeState};

    fn request() -> BookingRequest {
        BookingRequest {
            venue: "StudentCenter".into(),
            item: "Gym".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_hour: 17,
        }
    }

    fn table() -> VenueTable {
        VenueTable::empty().with_entry("StudentCenter", "Gym", "tab-0")
    }

    fn booking_page(state: &mut FakeState, req: &BookingRequest, seats: usize) {
        state.add_element(SEARCH_INPUT);
        state.add_element(VENUE_CARD);
        state.add_element("#tab-0");
        state.add_element(&date_tab_selector(req.date));
        state.set_count_in(SEAT_ROWS, seat_row_index(req.start_hour), FREE_SEAT, seats);
    }

    #[tokio::test(start_paused = true)]
    async fn full_pipeline_commits_the_order() {
        let req = request();
        let session = FakeSession::new(|s| booking_page(s, &request(), 3));

        let order = book(&session, &table(), &req).await.unwrap();

        assert_eq!(order.venue, "StudentCenter");
        assert_eq!(order.date, req.date);
        let clicks = session.inspect(|s| s.clicks.clone());
        assert_eq!(
            clicks,
            vec![
                SEARCH_BUTTON.to_string(),
                VENUE_CARD.to_string(),
                "#tab-0".to_string(),
                date_tab_selector(req.date),
                nth_scope(SEAT_ROWS, seat_row_index(req.start_hour), FREE_SEAT),
                CONFIRM_DRAWER.to_string(),
                TERMS_CHECKBOX.to_string(),
                TERMS_CONFIRM.to_string(),
                PAY_BUTTON.to_string(),
                FINAL_CONFIRM.to_string(),
            ]
        );
        let typed = session.inspect(|s| s.typed.clone());
        assert_eq!(typed, vec![(SEARCH_INPUT.to_string(), "StudentCenter".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_seats_is_a_distinct_failure_without_seat_click() {
        let req = request();
        let session = FakeSession::new(|s| booking_page(s, &request(), 0));

        let err = book(&session, &table(), &req).await.unwrap_err();

        assert!(matches!(err, BookingError::NoSeats { hour: 17, .. }));
        let seats = nth_scope(SEAT_ROWS, seat_row_index(req.start_hour), FREE_SEAT);
        assert_eq!(session.clicks_on(&seats), 0);
        assert_eq!(session.clicks_on(CONFIRM_DRAWER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_venue_item_fails_before_touching_the_page() {
        let req = BookingRequest {
            item: "Sauna".into(),
            ..request()
        };
        let session = FakeSession::new(|s| booking_page(s, &request(), 3));

        let err = book(&session, &table(), &req).await.unwrap_err();

        assert!(matches!(err, BookingError::UnknownVenueItem { .. }));
        assert!(session.inspect(|s| s.clicks.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_hour_is_rejected() {
        let req = BookingRequest {
            start_hour: 22,
            ..request()
        };
        let session = FakeSession::new(|s| booking_page(s, &request(), 3));

        let err = book(&session, &table(), &req).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidStartHour(22)));
    }

    #[test]
    fn seat_rows_are_indexed_into_the_match_list() {
        assert_eq!(seat_row_index(7), 0);
        assert_eq!(seat_row_index(17), 10);
        assert_eq!(seat_row_index(21), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn seats_from_other_rows_never_satisfy_the_request() {
        // free seats exist, but only in the hour-16 row below the target
        let req = request();
        let session = FakeSession::new(|s| {
            booking_page(s, &request(), 0);
            s.set_count_in(SEAT_ROWS, seat_row_index(16), FREE_SEAT, 3);
        });

        let err = book(&session, &table(), &req).await.unwrap_err();

        assert!(matches!(err, BookingError::NoSeats { hour: 17, .. }));
        assert_eq!(
            session.clicks_on(&nth_scope(SEAT_ROWS, seat_row_index(16), FREE_SEAT)),
            0
        );
    }

    #[test]
    fn date_tab_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(date_tab_selector(date), "#tab-2025-03-10");
    }
}
