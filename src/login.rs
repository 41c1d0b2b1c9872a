use std::path::Path;
use std::time::Duration;

use tokio::time::sleep;

use crate::browser::{PageWait, Session, SessionError};
use crate::captcha::{self, Ocr};
use crate::config::Credentials;

pub const BOOKING_URL: &str = "https://sports.sjtu.edu.cn";
pub const BOOKING_DOMAIN: &str = "sports.sjtu.edu.cn";
pub const IDP_DOMAIN: &str = "jaccount.sjtu.edu.cn";
pub const PORTAL_TITLE: &str = "上海交通大学体育场馆预约平台";
/// Title fragment of the portal once authenticated.
const AUTHENTICATED_TITLE: &str = "预约";

// sic: the portal really spells the container id "logoin"
pub const LOGIN_ENTRY: &str = "#app #logoin button";
pub const USERNAME_INPUT: &str = "#input-login-user";
pub const PASSWORD_INPUT: &str = "#input-login-pass";
pub const CAPTCHA_IMAGE: &str = "#captcha-img";
pub const CAPTCHA_INPUT: &str = "#input-login-captcha";
pub const SUBMIT_BUTTON: &str = "#submit-password-button";
pub const AUTH_ERROR: &str = ".auth-error";

const CAPTCHA_ERROR_TEXT: &str = "验证码";
const BAD_CREDENTIALS_TEXT: &str = "用户名或密码";

const PAGE_TIMEOUT: Duration = Duration::from_secs(20);
const SETTLE: Duration = Duration::from_secs(1);
const SUBMIT_SETTLE: Duration = Duration::from_secs(2);

/// Inner bound: solve/submit/check rounds for one credential submission.
pub const CAPTCHA_ROUND_LIMIT: u32 = 3;
/// Outer bound: fill-credentials cycles before giving up on this attempt.
pub const CREDENTIAL_CYCLE_LIMIT: u32 = 10;

/// Terminal result of one login run. `BadCredentials` is human-fixable and
/// must not be retried at any level; everything else non-`Success` is an
/// ordinary failure the attempt-level controller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    BadCredentials,
    CaptchaRejected,
    Timeout,
    Exhausted,
    Unknown,
}

/// Drive the identity-provider login until authenticated or exhausted.
///
/// Retry structure is three explicit, independently capped counters:
/// captcha rounds (here), credential cycles (here), and attempts (the
/// controller's). Nothing below the controller retries anything else.
pub async fn login<S: Session, O: Ocr>(
    session: &S,
    ocr: &O,
    credentials: &Credentials,
    captcha_debug_dir: Option<&Path>,
) -> Result<LoginOutcome, SessionError> {
    tracing::info!("opening booking portal");
    session.navigate(BOOKING_URL).await?;
    match session
        .wait_until(&PageWait::TitleContains(PORTAL_TITLE.into()), PAGE_TIMEOUT)
        .await
    {
        Ok(()) => {}
        Err(SessionError::WaitTimeout(_)) => {
            tracing::warn!("booking portal did not load in time");
            return Ok(LoginOutcome::Timeout);
        }
        Err(e) => return Err(e),
    }

    tracing::info!("portal loaded, entering login");
    session.click(LOGIN_ENTRY).await?;
    match session
        .wait_until(&PageWait::UrlContains(IDP_DOMAIN.into()), PAGE_TIMEOUT)
        .await
    {
        Ok(()) => {}
        Err(SessionError::WaitTimeout(_)) => {
            tracing::warn!("identity provider page did not load in time");
            return Ok(LoginOutcome::Timeout);
        }
        Err(e) => return Err(e),
    }

    for cycle in 1..=CREDENTIAL_CYCLE_LIMIT {
        tracing::info!("credential cycle {cycle}/{CREDENTIAL_CYCLE_LIMIT}");
        session
            .type_text(USERNAME_INPUT, &credentials.username)
            .await?;
        session
            .type_text(PASSWORD_INPUT, &credentials.password)
            .await?;

        // a captcha the recognizer cannot read will not improve on this
        // session; give up and let the controller start a fresh attempt
        if !captcha_rounds(session, ocr, captcha_debug_dir).await? {
            tracing::warn!("captcha rounds exhausted, giving up on this session");
            return Ok(LoginOutcome::Exhausted);
        }

        match await_login_result(session).await? {
            LoginOutcome::Success => {
                tracing::info!("login succeeded");
                return Ok(LoginOutcome::Success);
            }
            LoginOutcome::BadCredentials => {
                tracing::error!("bad username or password, aborting login");
                return Ok(LoginOutcome::BadCredentials);
            }
            LoginOutcome::CaptchaRejected => {
                tracing::info!("captcha rejected after submit, restarting cycle");
            }
            other => {
                tracing::info!("login result unclear ({other:?}), restarting cycle");
            }
        }
    }

    tracing::warn!("credential cycles exhausted");
    Ok(LoginOutcome::Exhausted)
}

/// One bounded run of solve/submit/check. Returns `true` once a submission
/// went through without an explicit captcha rejection, `false` when the
/// round budget is spent.
async fn captcha_rounds<S: Session, O: Ocr>(
    session: &S,
    ocr: &O,
    captcha_debug_dir: Option<&Path>,
) -> Result<bool, SessionError> {
    match session
        .wait_until(&PageWait::ElementPresent(CAPTCHA_IMAGE.into()), PAGE_TIMEOUT)
        .await
    {
        Ok(()) => {}
        Err(SessionError::WaitTimeout(_)) => {
            tracing::warn!("captcha image did not appear");
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    for round in 1..=CAPTCHA_ROUND_LIMIT {
        // give the (possibly refreshed) image a moment to render
        sleep(SETTLE).await;

        let png = session.screenshot_element(CAPTCHA_IMAGE).await?;
        let Some(text) = captcha::solve(ocr, &png, captcha_debug_dir).await else {
            tracing::info!("captcha round {round}/{CAPTCHA_ROUND_LIMIT}: no result, refreshing");
            session.click(CAPTCHA_IMAGE).await?;
            continue;
        };

        session.type_text(CAPTCHA_INPUT, &text).await?;
        session.click(SUBMIT_BUTTON).await?;
        sleep(SUBMIT_SETTLE).await;

        if auth_error_contains(session, CAPTCHA_ERROR_TEXT).await? {
            tracing::info!("captcha round {round}/{CAPTCHA_ROUND_LIMIT}: rejected, refreshing");
            session.click(CAPTCHA_IMAGE).await?;
            continue;
        }

        return Ok(true);
    }

    Ok(false)
}

/// Wait for the redirect back to the booking portal; on timeout, classify
/// the cycle from the identity provider's error banner.
async fn await_login_result<S: Session>(session: &S) -> Result<LoginOutcome, SessionError> {
    let authenticated = PageWait::UrlAndTitle {
        url: BOOKING_DOMAIN.into(),
        title: AUTHENTICATED_TITLE.into(),
    };
    match session.wait_until(&authenticated, PAGE_TIMEOUT).await {
        Ok(()) => Ok(LoginOutcome::Success),
        Err(SessionError::WaitTimeout(_)) => {
            if auth_error_contains(session, BAD_CREDENTIALS_TEXT).await? {
                Ok(LoginOutcome::BadCredentials)
            } else if auth_error_contains(session, CAPTCHA_ERROR_TEXT).await? {
                Ok(LoginOutcome::CaptchaRejected)
            } else {
                Ok(LoginOutcome::Unknown)
            }
        }
        Err(e) => Err(e),
    }
}

async fn auth_error_contains<S: Session>(
    session: &S,
    needle: &str,
) -> Result<bool, SessionError> {
    Ok(session
        .element_text(AUTH_ERROR)
        .await?
        .is_some_and(|text| text.contains(needle)))
}
