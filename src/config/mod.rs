use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;
use validator::Validate;

pub(super) const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_TWIML_URL: &str = "http://demo.twilio.com/docs/voice.xml";


/// Everything the watcher needs for one run.
///
/// Loaded once at startup and handed to each component when it is built. Nothing
/// reads the environment after [`Config::load`] returns.
#[derive(Deserialize, Validate, Debug, Clone)]
pub(crate) struct Config {
    #[validate]
    pub(crate) target: TargetConfig,
    #[serde(default)]
    pub(crate) paths: PathsConfig,
    #[serde(default)]
    #[validate]
    pub(crate) alerts: AlertsConfig,
    #[serde(default)]
    pub(crate) format: FormatConfig,
    #[serde(default)]
    pub(crate) report: ReportConfig,
    /// Telephony settings. `None` means calls are disabled.
    #[validate]
    pub(crate) twilio: Option<TwilioConfig>,
}


/// The product page being watched.
#[derive(Deserialize, Validate, Debug, Clone)]
pub(crate) struct TargetConfig {
    /// Address of the product page. Every stored reading carries this url.
    pub(crate) url: Url,
    /// CSS selector of the element holding the price, eg. `$1,299.00`.
    #[serde(default = "default_price_selector")]
    pub(crate) price_selector: String,
    /// CSS selector of the element holding the stock flag, eg. `Disponibles: 12 pzas.`
    #[serde(default = "default_stock_selector")]
    pub(crate) stock_selector: String,
    /// Text stripped from the start of the stock flag before parsing.
    #[serde(default = "default_stock_prefix")]
    pub(crate) stock_prefix: String,
    /// Text stripped from the end of the stock flag before parsing.
    #[serde(default = "default_stock_suffix")]
    pub(crate) stock_suffix: String,
    /// How long to let the page settle before the browser is closed.
    #[serde(default = "default_settle_ms")]
    #[validate(range(max = 60000))]
    pub(crate) settle_ms: u64,
}


#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PathsConfig {
    pub(crate) database: PathBuf,
    pub(crate) report: PathBuf,
    pub(crate) screenshot: PathBuf,
    /// Markdown template used instead of the built in one.
    pub(crate) report_template: Option<PathBuf>,
}


impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data.db"),
            report: PathBuf::from("README.md"),
            screenshot: PathBuf::from("screenshot.png"),
            report_template: None,
        }
    }
}


/// Thresholds for the low stock and absolute price triggers.
///
/// A threshold that is not set never fires.
#[derive(Deserialize, Validate, Debug, Clone, Default)]
pub(crate) struct AlertsConfig {
    /// Call when the stock is at or below this many units.
    pub(crate) stock_threshold: Option<u32>,
    /// Call when the price is strictly below this amount.
    #[validate(range(min = 0.0))]
    pub(crate) price_threshold: Option<f64>,
}


/// How amounts and dates are written in the report.
///
/// The defaults follow the `es-MX` locale with `MXN` amounts. These settings only
/// affect display: prices are always read off the page as `$1,234.56`, with an
/// optional three letter currency code.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct FormatConfig {
    pub(crate) currency_symbol: String,
    pub(crate) thousands_separator: String,
    pub(crate) decimal_separator: String,
    /// A chrono `strftime` pattern.
    pub(crate) datetime_pattern: String,
}


impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            currency_symbol: "$".into(),
            thousands_separator: ",".into(),
            decimal_separator: ".".into(),
            datetime_pattern: "%d/%m/%y, %-I:%M %P".into(),
        }
    }
}


#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct ReportConfig {
    /// First heading of the report.
    pub(crate) title: String,
    /// A markdown line placed under the title, usually a CI status badge.
    pub(crate) badge: Option<String>,
}


impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "price-watch".into(),
            badge: None,
        }
    }
}


/// Credentials and numbers used to place the alert call.
#[derive(Deserialize, Validate, Debug, Clone)]
pub(crate) struct TwilioConfig {
    #[serde(default)]
    pub(crate) account_sid: String,
    #[serde(default)]
    pub(crate) auth_token: String,
    /// The Twilio number the call is placed from.
    #[serde(default)]
    #[validate(phone)]
    pub(crate) from: String,
    /// The number that gets called.
    #[serde(default)]
    #[validate(phone)]
    pub(crate) to: String,
    /// TwiML document that drives the call once it is answered.
    #[serde(default = "default_twiml_url")]
    #[validate(url)]
    pub(crate) twiml_url: String,
    /// Root of the Twilio REST api.
    #[serde(default = "default_api_base")]
    #[validate(url)]
    pub(crate) api_base: String,
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub(crate) timeout_secs: u64,
}


impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from: String::new(),
            to: String::new(),
            twiml_url: default_twiml_url(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}


impl TwilioConfig {
    /// Fills credentials and numbers from the environment variables the watcher has always
    /// understood. Variables win over the file so secrets can stay out of it.
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        let fields = [
            ("TWILIO_ACCOUNT_SID", &mut self.account_sid),
            ("TWILIO_AUTH_TOKEN", &mut self.auth_token),
            ("TWILIO_PHONE_NUMBER", &mut self.from),
            ("MY_PHONE_NUMBER", &mut self.to),
        ];
        for (name, field) in fields {
            if let Some(value) = var(name).filter(|v| !v.trim().is_empty()) {
                *field = value.trim().to_string();
            }
        }
    }

    /// `Ok(None)` when nothing was configured, an error when only part of it was.
    fn into_complete(self) -> anyhow::Result<Option<Self>> {
        let missing: Vec<&str> = [
            ("account_sid", &self.account_sid),
            ("auth_token", &self.auth_token),
            ("from", &self.from),
            ("to", &self.to),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        match missing.len() {
            0 => Ok(Some(self)),
            4 => Ok(None),
            _ => bail!("incomplete twilio settings, missing: {}", missing.join(", ")),
        }
    }
}


impl Config {
    /// Reads, completes and validates the configuration at `path`.
    pub(super) fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text, |name| std::env::var(name).ok())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub(crate) fn from_toml(text: &str, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(text)?;

        if let Some(url) = var("URL").filter(|v| !v.trim().is_empty()) {
            config.target.url = url.trim().parse().context("URL is not a valid address")?;
        }

        let mut twilio = config.twilio.take().unwrap_or_default();
        twilio.apply_overrides(&var);
        config.twilio = twilio.into_complete()?;

        config.validate()?;
        Ok(config)
    }
}


fn default_price_selector() -> String {
    ".oldPrice cp-ar".into()
}


fn default_stock_selector() -> String {
    ".stockFlag".into()
}


fn default_stock_prefix() -> String {
    "Disponibles: ".into()
}


fn default_stock_suffix() -> String {
    "pzas.".into()
}


fn default_settle_ms() -> u64 {
    1_000
}


fn default_twiml_url() -> String {
    DEFAULT_TWIML_URL.into()
}


fn default_api_base() -> String {
    "https://api.twilio.com".into()
}


fn default_timeout_secs() -> u64 {
    30
}
