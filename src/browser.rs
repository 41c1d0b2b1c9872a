use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("timed out waiting for {0}")]
    WaitTimeout(String),

    #[error("page interaction failed: {0}")]
    Interaction(String),
}

/// Condition polled by [`Session::wait_until`].
#[derive(Debug, Clone)]
pub enum PageWait {
    UrlContains(String),
    TitleContains(String),
    UrlAndTitle { url: String, title: String },
    ElementPresent(String),
}

/// Interval between condition polls inside `wait_until`.
const WAIT_POLL: Duration = Duration::from_millis(500);

/// Capability surface the login state machine and booking flow drive.
/// Selector-based so a scripted fake can stand in for a real browser.
pub trait Session {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;
    async fn current_url(&self) -> Result<String, SessionError>;
    async fn page_title(&self) -> Result<String, SessionError>;
    async fn element_present(&self, selector: &str) -> Result<bool, SessionError>;
    /// Text of the first matching element, `None` if absent.
    async fn element_text(&self, selector: &str) -> Result<Option<String>, SessionError>;
    async fn count_elements(&self, selector: &str) -> Result<usize, SessionError>;
    async fn click(&self, selector: &str) -> Result<(), SessionError>;
    /// Count `inner` matches inside the `index`-th match of `scope`.
    /// Scoping indexes the match list, not sibling position.
    async fn count_in_nth(
        &self,
        scope: &str,
        index: usize,
        inner: &str,
    ) -> Result<usize, SessionError>;
    /// Click the first `inner` match inside the `index`-th match of `scope`.
    async fn click_in_nth(
        &self,
        scope: &str,
        index: usize,
        inner: &str,
    ) -> Result<(), SessionError>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError>;
    /// PNG screenshot of a single element (used for the captcha image).
    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, SessionError>;
    async fn close(&self) -> Result<(), SessionError>;

    /// Bounded poll until the condition holds. An operation either completes
    /// within its timeout or the caller treats it as failed; there is no
    /// cancellation from outside.
    async fn wait_until(&self, wait: &PageWait, timeout: Duration) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let satisfied = match wait {
                PageWait::UrlContains(part) => self.current_url().await?.contains(part),
                PageWait::TitleContains(part) => self.page_title().await?.contains(part),
                PageWait::UrlAndTitle { url, title } => {
                    self.current_url().await?.contains(url)
                        && self.page_title().await?.contains(title)
                }
                PageWait::ElementPresent(selector) => self.element_present(selector).await?,
            };
            if satisfied {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SessionError::WaitTimeout(format!("{wait:?}")));
            }
            sleep(WAIT_POLL).await;
        }
    }
}

/// Opens a fresh session per attempt. Sessions are never reused across
/// attempts: stale cookies on the identity provider make login flaky.
pub trait SessionFactory {
    type Session: Session;

    async fn open(&self) -> Result<Self::Session, SessionError>;
}

pub struct ChromeFactory {
    config: Config,
}

impl ChromeFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl SessionFactory for ChromeFactory {
    type Session = ChromeSession;

    async fn open(&self) -> Result<ChromeSession, SessionError> {
        ChromeSession::launch(&self.config).await
    }
}

pub struct ChromeSession {
    browser: Mutex<Browser>,
    _profile_dir: tempfile::TempDir,
    page: Page,
}

impl ChromeSession {
    pub async fn launch(config: &Config) -> Result<Self, SessionError> {
        // Fresh temp profile each launch so no cookies/state persist between attempts
        let user_data_dir = tempfile::tempdir()
            .map_err(|e| SessionError::LaunchFailed(format!("temp profile dir: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .viewport(Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: Some(1.0),
                ..Default::default()
            })
            .arg("--disable-dev-shm-usage")
            .arg("--force-device-scale-factor=1")
            // Use the tempdir via the builder method (not .arg()) so chromiumoxide
            // doesn't silently override it with /tmp/chromiumoxide-runner.
            .user_data_dir(user_data_dir.path());

        if config.headless {
            // New headless mode; .with_head() prevents chromiumoxide from adding
            // the old --headless flag, then we add --headless=new ourselves.
            builder = builder.with_head().arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        // Drain the browser event stream
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::LaunchFailed(format!("new page: {e}")))?;

        Ok(ChromeSession {
            browser: Mutex::new(browser),
            _profile_dir: user_data_dir,
            page,
        })
    }

    async fn evaluate<T: serde::de::DeserializeOwned + Default>(
        &self,
        js: String,
        what: &str,
    ) -> Result<T, SessionError> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| SessionError::Interaction(format!("{what}: {e}")))?;
        Ok(result.into_value::<T>().unwrap_or_default())
    }
}

fn js_quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

impl Session for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| SessionError::Interaction(format!("navigate {url}: {e}")))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| SessionError::Interaction(format!("current url: {e}")))?;
        Ok(url.unwrap_or_default())
    }

    async fn page_title(&self) -> Result<String, SessionError> {
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| SessionError::Interaction(format!("page title: {e}")))?;
        Ok(title.unwrap_or_default())
    }

    async fn element_present(&self, selector: &str) -> Result<bool, SessionError> {
        let js = format!("document.querySelector('{}') !== null", js_quote(selector));
        self.evaluate::<bool>(js, "element_present").await
    }

    async fn element_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelector('{selector}');
                return el ? (el.textContent || '') : null;
            }})()
            "#,
            selector = js_quote(selector),
        );
        self.evaluate::<Option<String>>(js, "element_text").await
    }

    async fn count_elements(&self, selector: &str) -> Result<usize, SessionError> {
        let js = format!(
            "document.querySelectorAll('{}').length",
            js_quote(selector)
        );
        self.evaluate::<usize>(js, "count_elements").await
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelector('{selector}');
                if (el) {{
                    el.click();
                    return true;
                }}
                return false;
            }})()
            "#,
            selector = js_quote(selector),
        );
        let clicked: bool = self.evaluate(js, "click").await?;
        if !clicked {
            return Err(SessionError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn count_in_nth(
        &self,
        scope: &str,
        index: usize,
        inner: &str,
    ) -> Result<usize, SessionError> {
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelectorAll('{scope}')[{index}];
                return el ? el.querySelectorAll('{inner}').length : 0;
            }})()
            "#,
            scope = js_quote(scope),
            inner = js_quote(inner),
        );
        self.evaluate::<usize>(js, "count_in_nth").await
    }

    async fn click_in_nth(
        &self,
        scope: &str,
        index: usize,
        inner: &str,
    ) -> Result<(), SessionError> {
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelectorAll('{scope}')[{index}];
                const target = el ? el.querySelector('{inner}') : null;
                if (target) {{
                    target.click();
                    return true;
                }}
                return false;
            }})()
            "#,
            scope = js_quote(scope),
            inner = js_quote(inner),
        );
        let clicked: bool = self.evaluate(js, "click_in_nth").await?;
        if !clicked {
            return Err(SessionError::ElementNotFound(format!(
                "{scope}[{index}] {inner}"
            )));
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError> {
        // Set the value and fire input/change so element-ui's v-model picks it up
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelector('{selector}');
                if (!el) return false;
                el.focus();
                el.value = '{text}';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            selector = js_quote(selector),
            text = js_quote(text),
        );
        let typed: bool = self.evaluate(js, "type_text").await?;
        if !typed {
            return Err(SessionError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, SessionError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::ElementNotFound(selector.to_string()))?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| SessionError::ScreenshotFailed(format!("{selector}: {e}")))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| SessionError::Interaction(format!("browser close: {e}")))?;
        browser
            .wait()
            .await
            .map_err(|e| SessionError::Interaction(format!("browser wait: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{Session, SessionError};

    type ClickHook = Box<dyn Fn(&mut FakeState, &str) + Send + Sync>;

    /// Key under which a scoped lookup (`count_in_nth`/`click_in_nth`) is
    /// modelled in [`FakeState`]. Tests build the same key to preset counts
    /// and to assert recorded clicks.
    pub fn nth_scope(scope: &str, index: usize, inner: &str) -> String {
        format!("{scope}[{index}] {inner}")
    }

    /// Mutable page model behind [`FakeSession`]. Tests preset elements and
    /// texts, then inspect the recorded interactions afterwards.
    #[derive(Default)]
    pub struct FakeState {
        pub url: String,
        pub title: String,
        /// selector -> number of matching elements
        pub elements: HashMap<String, usize>,
        /// selector -> text content
        pub texts: HashMap<String, String>,
        pub navigations: Vec<String>,
        pub clicks: Vec<String>,
        pub typed: Vec<(String, String)>,
        pub screenshots: Vec<String>,
        pub closed: bool,
    }

    impl FakeState {
        pub fn add_element(&mut self, selector: &str) {
            self.elements.insert(selector.to_string(), 1);
        }

        pub fn set_count(&mut self, selector: &str, count: usize) {
            self.elements.insert(selector.to_string(), count);
        }

        pub fn set_count_in(&mut self, scope: &str, index: usize, inner: &str, count: usize) {
            self.elements.insert(nth_scope(scope, index, inner), count);
        }

        pub fn set_text(&mut self, selector: &str, text: &str) {
            self.elements.insert(selector.to_string(), 1);
            self.texts.insert(selector.to_string(), text.to_string());
        }

        pub fn clear_text(&mut self, selector: &str) {
            self.elements.remove(selector);
            self.texts.remove(selector);
        }
    }

    /// Scripted in-memory stand-in for a real browser session. A click hook
    /// lets each test model page reactions (redirects, error banners).
    pub struct FakeSession {
        state: Mutex<FakeState>,
        click_hook: Option<ClickHook>,
    }

    impl FakeSession {
        pub fn new(setup: impl FnOnce(&mut FakeState)) -> Self {
            let mut state = FakeState::default();
            setup(&mut state);
            Self {
                state: Mutex::new(state),
                click_hook: None,
            }
        }

        pub fn with_click_hook(
            mut self,
            hook: impl Fn(&mut FakeState, &str) + Send + Sync + 'static,
        ) -> Self {
            self.click_hook = Some(Box::new(hook));
            self
        }

        pub fn inspect<T>(&self, f: impl FnOnce(&FakeState) -> T) -> T {
            f(&self.state.lock().unwrap())
        }

        pub fn clicks_on(&self, selector: &str) -> usize {
            self.inspect(|s| s.clicks.iter().filter(|c| *c == selector).count())
        }

        pub fn screenshots_of(&self, selector: &str) -> usize {
            self.inspect(|s| s.screenshots.iter().filter(|c| *c == selector).count())
        }
    }

    impl Session for FakeSession {
        async fn navigate(&self, url: &str) -> Result<(), SessionError> {
            let mut state = self.state.lock().unwrap();
            state.url = url.to_string();
            state.navigations.push(url.to_string());
            Ok(())
        }

        async fn current_url(&self) -> Result<String, SessionError> {
            Ok(self.state.lock().unwrap().url.clone())
        }

        async fn page_title(&self) -> Result<String, SessionError> {
            Ok(self.state.lock().unwrap().title.clone())
        }

        async fn element_present(&self, selector: &str) -> Result<bool, SessionError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .elements
                .get(selector)
                .is_some_and(|n| *n > 0))
        }

        async fn element_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
            Ok(self.state.lock().unwrap().texts.get(selector).cloned())
        }

        async fn count_elements(&self, selector: &str) -> Result<usize, SessionError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .elements
                .get(selector)
                .copied()
                .unwrap_or(0))
        }

        async fn click(&self, selector: &str) -> Result<(), SessionError> {
            let mut state = self.state.lock().unwrap();
            state.clicks.push(selector.to_string());
            if let Some(ref hook) = self.click_hook {
                hook(&mut state, selector);
            }
            Ok(())
        }

        async fn count_in_nth(
            &self,
            scope: &str,
            index: usize,
            inner: &str,
        ) -> Result<usize, SessionError> {
            let key = nth_scope(scope, index, inner);
            Ok(self
                .state
                .lock()
                .unwrap()
                .elements
                .get(&key)
                .copied()
                .unwrap_or(0))
        }

        async fn click_in_nth(
            &self,
            scope: &str,
            index: usize,
            inner: &str,
        ) -> Result<(), SessionError> {
            let key = nth_scope(scope, index, inner);
            let mut state = self.state.lock().unwrap();
            if state.elements.get(&key).copied().unwrap_or(0) == 0 {
                return Err(SessionError::ElementNotFound(key));
            }
            state.clicks.push(key.clone());
            if let Some(ref hook) = self.click_hook {
                hook(&mut state, &key);
            }
            Ok(())
        }

        async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError> {
            self.state
                .lock()
                .unwrap()
                .typed
                .push((selector.to_string(), text.to_string()));
            Ok(())
        }

        async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, SessionError> {
            let mut state = self.state.lock().unwrap();
            if state.elements.get(selector).copied().unwrap_or(0) == 0 {
                return Err(SessionError::ElementNotFound(selector.to_string()));
            }
            state.screenshots.push(selector.to_string());
            Ok(b"fake-png".to_vec())
        }

        async fn close(&self) -> Result<(), SessionError> {
            self.state.lock().unwrap().closed = true;
            Ok(())
        }
    }

    // The bot consumes the session it opened; tests keep an Arc alias so
    // they can inspect it after the attempt finishes.
    impl Session for std::sync::Arc<FakeSession> {
        async fn navigate(&self, url: &str) -> Result<(), SessionError> {
            (**self).navigate(url).await
        }

        async fn current_url(&self) -> Result<String, SessionError> {
            (**self).current_url().await
        }

        async fn page_title(&self) -> Result<String, SessionError> {
            (**self).page_title().await
        }

        async fn element_present(&self, selector: &str) -> Result<bool, SessionError> {
            (**self).element_present(selector).await
        }

        async fn element_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
            (**self).element_text(selector).await
        }

        async fn count_elements(&self, selector: &str) -> Result<usize, SessionError> {
            (**self).count_elements(selector).await
        }

        async fn click(&self, selector: &str) -> Result<(), SessionError> {
            (**self).click(selector).await
        }

        async fn count_in_nth(
            &self,
            scope: &str,
            index: usize,
            inner: &str,
        ) -> Result<usize, SessionError> {
            (**self).count_in_nth(scope, index, inner).await
        }

        async fn click_in_nth(
            &self,
            scope: &str,
            index: usize,
            inner: &str,
        ) -> Result<(), SessionError> {
            (**self).click_in_nth(scope, index, inner).await
        }

        async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError> {
            (**self).type_text(selector, text).await
        }

        async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, SessionError> {
            (**self).screenshot_element(selector).await
        }

        async fn close(&self) -> Result<(), SessionError> {
            (**self).close().await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::browser::PageWait;
        use std::time::Duration;

        #[tokio::test(start_paused = true)]
        async fn wait_until_times_out_when_condition_never_holds() {
            let session = FakeSession::new(|_| {});
            let err = session
                .wait_until(
                    &PageWait::ElementPresent("#missing".into()),
                    Duration::from_secs(5),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::WaitTimeout(_)));
        }

        #[tokio::test(start_paused = true)]
        async fn wait_until_returns_once_condition_holds() {
            let session = FakeSession::new(|s| {
                s.url = "https://example.org/app".into();
            });
            session
                .wait_until(
                    &PageWait::UrlContains("example.org".into()),
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
        }
    }
}
