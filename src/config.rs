use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),
}

/// Account credentials, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// ServerChan push key; notifications are skipped when absent.
    pub sc_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub chromium_path: Option<String>,
    /// Run browser in headless mode (default false; use xvfb-run on servers)
    pub headless: bool,
    /// Endpoint of the captcha OCR service.
    pub ocr_url: String,
    /// Append-only log file, mirrored to the console.
    pub log_file: String,
    /// When set, processed captcha images are written here for debugging.
    pub captcha_debug_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = required_env("VENUEBOT_USERNAME")?;
        let password = required_env("VENUEBOT_PASSWORD")?;
        let sc_key = std::env::var("VENUEBOT_SC_KEY").ok();

        let chromium_path = std::env::var("VENUEBOT_CHROMIUM_PATH").ok();

        let headless = std::env::var("VENUEBOT_HEADLESS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let ocr_url = std::env::var("VENUEBOT_OCR_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9898/ocr".into());

        let log_file =
            std::env::var("VENUEBOT_LOG_FILE").unwrap_or_else(|_| "venuebot.log".into());

        let captcha_debug_dir = std::env::var("VENUEBOT_CAPTCHA_DEBUG_DIR").ok();

        Ok(Config {
            credentials: Credentials {
                username,
                password,
                sc_key,
            },
            chromium_path,
            headless,
            ocr_url,
            log_file,
            captcha_debug_dir,
        })
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.into()))
}
