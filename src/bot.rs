use std::path::PathBuf;

use crate::booking::{self, BookedOrder, BookingRequest};
use crate::browser::{Session, SessionFactory};
use crate::captcha::Ocr;
use crate::config::Credentials;
use crate::login::{self, LoginOutcome};
use crate::notify::{self, Notifier};
use crate::schedule::{Attempt, AttemptError};
use crate::venues::VenueTable;

/// Production attempt runner: one fresh browser session per attempt,
/// login state machine, booking pipeline, then a fire-and-forget push.
pub struct BookingBot<F, O, N> {
    factory: F,
    ocr: O,
    notifier: N,
    credentials: Credentials,
    venues: VenueTable,
    captcha_debug_dir: Option<PathBuf>,
}

impl<F: SessionFactory, O: Ocr, N: Notifier> BookingBot<F, O, N> {
    pub fn new(
        factory: F,
        ocr: O,
        notifier: N,
        credentials: Credentials,
        venues: VenueTable,
        captcha_debug_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            factory,
            ocr,
            notifier,
            credentials,
            venues,
            captcha_debug_dir,
        }
    }

    async fn run_pipeline<S: Session>(
        &self,
        session: &S,
        request: &BookingRequest,
    ) -> Result<BookedOrder, AttemptError> {
        let outcome = login::login(
            session,
            &self.ocr,
            &self.credentials,
            self.captcha_debug_dir.as_deref(),
        )
        .await?;
        match outcome {
            LoginOutcome::Success => {}
            LoginOutcome::BadCredentials => return Err(AttemptError::BadCredentials),
            other => return Err(AttemptError::Login(other)),
        }

        let order = booking::book(session, &self.venues, request).await?;
        self.notify_booked(&order).await;
        Ok(order)
    }

    /// Notification failure must never fail a booking that went through.
    async fn notify_booked(&self, order: &BookedOrder) {
        let (title, body, short) = notify::booked_message(order);
        if let Err(e) = self.notifier.send(&title, &body, &short).await {
            tracing::warn!("notification failed: {e:#}");
        }
    }
}

impl<F: SessionFactory, O: Ocr, N: Notifier> Attempt for BookingBot<F, O, N> {
    async fn run(&self, request: &BookingRequest) -> Result<BookedOrder, AttemptError> {
        let session = self.factory.open().await?;
        let result = self.run_pipeline(&session, request).await;
        // teardown on every exit path; a failed teardown is logged but
        // never masks the attempt result
        if let Err(e) = session.close().await {
            tracing::warn!("session teardown failed: {e}");
        }
        result
    }
}
