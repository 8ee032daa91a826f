use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which detection/activation backend drives the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Screen,
    Webdriver,
    Stub,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "screen" => Ok(BackendKind::Screen),
            "webdriver" => Ok(BackendKind::Webdriver),
            "stub" => Ok(BackendKind::Stub),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Immutable run configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub start_hotkey: String,
    pub stop_hotkey: String,
    pub debounce_ms: u64,

    pub backend: BackendKind,
    pub image_match_confidence: f64,
    /// Per-target minimum confidence; effective value is max(base, floor).
    pub confidence_floors: BTreeMap<String, f64>,
    /// Template directory for the screen backend.
    pub targets_dir: PathBuf,
    /// Locators for the webdriver/stub backends, keyed by target name.
    /// A value starting with `xpath:` is an XPath expression, else CSS.
    pub selectors: BTreeMap<String, String>,
    pub webdriver_url: String,
    pub webdriver_session: Option<String>,

    pub enable_waiting_list: bool,
    pub roi_enabled: bool,
    pub region_file: PathBuf,

    pub reservation_scan_timeout_sec: f64,
    pub refresh_settle_delay_sec: f64,
    pub refresh_idle_ms: u64,
    pub search_poll_ms: u64,
    pub probe_retry_delay_ms: u64,
    pub log_throttle_ms: u64,
    pub max_dispatch_failures: u32,

    pub enable_telegram_notification: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub escalation_interval_sec: f64,
    pub alert_max_duration_sec: f64,
    /// Waitlist alerts are a single message unless this is raised.
    pub waitlist_alert_duration_sec: f64,
    pub request_timeout_sec: f64,
    pub shutdown_grace_sec: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let confidence_floors = [("booking-offer", 0.92), ("waitlist-offer", 0.92)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let selectors = [
            ("refresh-control", "xpath://input[@value='조회하기']"),
            (
                "booking-offer",
                "xpath://*[@id='result-form']//tbody/tr/td[7]/a[contains(., '예약하기')]",
            ),
            (
                "waitlist-offer",
                "xpath://*[@id='result-form']//tbody/tr/td[8]/a[contains(., '신청하기')]",
            ),
            ("connection-queue-banner", "#NetFunnel_Loading_Popup"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            start_hotkey: "f9".into(),
            stop_hotkey: "esc".into(),
            debounce_ms: 250,
            backend: BackendKind::Screen,
            image_match_confidence: 0.88,
            confidence_floors,
            targets_dir: PathBuf::from("targets"),
            selectors,
            webdriver_url: "http://127.0.0.1:9515".into(),
            webdriver_session: None,
            enable_waiting_list: true,
            roi_enabled: true,
            region_file: PathBuf::from("runtime/result_region.json"),
            reservation_scan_timeout_sec: 5.0,
            refresh_settle_delay_sec: 0.18,
            refresh_idle_ms: 150,
            search_poll_ms: 50,
            probe_retry_delay_ms: 120,
            log_throttle_ms: 1000,
            max_dispatch_failures: 5,
            enable_telegram_notification: false,
            telegram_bot_token: None,
            telegram_chat_id: None,
            escalation_interval_sec: 5.0,
            alert_max_duration_sec: 300.0,
            waitlist_alert_duration_sec: 0.0,
            request_timeout_sec: 8.0,
            shutdown_grace_sec: 3.0,
        }
    }
}

fn hotkey_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(f([1-9]|1[0-2])|esc|space|enter|tab|[a-z0-9])$")
            .unwrap_or_else(|e| panic!("hotkey pattern: {e}"))
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "y" | "yes" => Ok(true),
        "0" | "false" | "f" | "n" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid { field: key, reason: format!("expected true/false, got '{}'", raw) }),
    }
}

fn parse_f64(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { field: key, reason: format!("expected a number, got '{}'", raw) })
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn check_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if !(lo..=hi).contains(&value) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{} is outside {}..={}", value, lo, hi),
        });
    }
    Ok(())
}

impl RunConfig {
    /// Load `path` (defaults when absent), apply process environment
    /// overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<RunConfig>(&s).map_err(|e| ConfigError::Malformed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RunConfig::default(),
            Err(e) => {
                return Err(ConfigError::Io { context: format!("reading {}", path.display()), source: e })
            }
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style lookups. Blank values are
    /// treated as unset.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| non_empty(env(key));

        if let Some(v) = get("START_HOTKEY") {
            self.start_hotkey = v;
        }
        if let Some(v) = get("STOP_HOTKEY") {
            self.stop_hotkey = v;
        }
        if let Some(v) = get("IMAGE_MATCH_CONFIDENCE") {
            self.image_match_confidence = parse_f64("IMAGE_MATCH_CONFIDENCE", &v)?;
        }
        if let Some(v) = get("ENABLE_WAITING_LIST") {
            self.enable_waiting_list = parse_bool("ENABLE_WAITING_LIST", &v)?;
        }
        if let Some(v) = get("ROI_ENABLED") {
            self.roi_enabled = parse_bool("ROI_ENABLED", &v)?;
        }
        if let Some(v) = get("RESERVATION_SCAN_TIMEOUT_SEC") {
            self.reservation_scan_timeout_sec = parse_f64("RESERVATION_SCAN_TIMEOUT_SEC", &v)?;
        }
        if let Some(v) = get("REFRESH_SETTLE_DELAY_SEC") {
            self.refresh_settle_delay_sec = parse_f64("REFRESH_SETTLE_DELAY_SEC", &v)?;
        }
        if let Some(v) = get("ENABLE_TELEGRAM_NOTIFICATION") {
            self.enable_telegram_notification = parse_bool("ENABLE_TELEGRAM_NOTIFICATION", &v)?;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = Some(v);
        }
        if let Some(v) = get("SEATWATCH_BACKEND") {
            self.backend = v
                .parse()
                .map_err(|reason| ConfigError::Invalid { field: "SEATWATCH_BACKEND", reason })?;
        }
        if let Some(v) = get("WEBDRIVER_URL") {
            self.webdriver_url = v;
        }
        if let Some(v) = get("WEBDRIVER_SESSION") {
            self.webdriver_session = Some(v);
        }
        Ok(())
    }

    /// Normalizes hotkeys and credentials, then checks ranges and
    /// cross-field rules.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.start_hotkey = self.start_hotkey.trim().to_lowercase();
        self.stop_hotkey = self.stop_hotkey.trim().to_lowercase();
        self.telegram_bot_token = non_empty(self.telegram_bot_token.take());
        self.telegram_chat_id = non_empty(self.telegram_chat_id.take());

        for (field, key) in [("start_hotkey", &self.start_hotkey), ("stop_hotkey", &self.stop_hotkey)] {
            if key.is_empty() {
                return Err(ConfigError::Invalid { field, reason: "hotkey must not be empty".into() });
            }
            if !hotkey_pattern().is_match(key) {
                return Err(ConfigError::Invalid { field, reason: format!("unsupported key '{}'", key) });
            }
        }
        if self.start_hotkey == self.stop_hotkey {
            return Err(ConfigError::Conflict("start and stop hotkeys must differ".into()));
        }

        check_range("image_match_confidence", self.image_match_confidence, 0.4, 0.99)?;
        for floor in self.confidence_floors.values() {
            check_range("confidence_floors", *floor, 0.0, 1.0)?;
        }
        check_range("reservation_scan_timeout_sec", self.reservation_scan_timeout_sec, 0.5, 15.0)?;
        check_range("refresh_settle_delay_sec", self.refresh_settle_delay_sec, 0.05, 2.0)?;
        check_range("escalation_interval_sec", self.escalation_interval_sec, 0.1, 600.0)?;
        check_range("alert_max_duration_sec", self.alert_max_duration_sec, 0.0, 3600.0)?;
        check_range("waitlist_alert_duration_sec", self.waitlist_alert_duration_sec, 0.0, 3600.0)?;
        check_range("search_poll_ms", self.search_poll_ms as f64, 10.0, 1000.0)?;
        check_range("refresh_idle_ms", self.refresh_idle_ms as f64, 10.0, 5000.0)?;
        check_range("debounce_ms", self.debounce_ms as f64, 0.0, 2000.0)?;
        check_range("request_timeout_sec", self.request_timeout_sec, 0.5, 9.0)?;
        check_range("shutdown_grace_sec", self.shutdown_grace_sec, 0.0, 30.0)?;

        if self.enable_telegram_notification {
            if self.telegram_bot_token.is_none() {
                return Err(ConfigError::Conflict(
                    "telegram_bot_token is required when notifications are enabled".into(),
                ));
            }
            if self.telegram_chat_id.is_none() {
                return Err(ConfigError::Conflict(
                    "telegram_chat_id is required when notifications are enabled".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn confidence_floor(&self, target: &str) -> Option<f64> {
        self.confidence_floors.get(target).copied()
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reservation_scan_timeout_sec)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_settle_delay_sec)
    }

    pub fn refresh_idle(&self) -> Duration {
        Duration::from_millis(self.refresh_idle_ms)
    }

    pub fn search_poll(&self) -> Duration {
        Duration::from_millis(self.search_poll_ms)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn log_throttle(&self) -> Duration {
        Duration::from_millis(self.log_throttle_ms)
    }

    pub fn escalation_interval(&self) -> Duration {
        Duration::from_secs_f64(self.escalation_interval_sec)
    }

    pub fn alert_max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.alert_max_duration_sec)
    }

    pub fn waitlist_alert_duration(&self) -> Duration {
        Duration::from_secs_f64(self.waitlist_alert_duration_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_sec)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace_sec)
    }

    /// One-line-per-setting summary sent when notifications start up.
    pub fn summary(&self) -> String {
        format!(
            "seatwatch starting:\n- backend: {:?}\n- start/stop: {}/{}\n- waitlist: {}\n- result region: {}\n- scan timeout: {:.1}s",
            self.backend,
            self.start_hotkey,
            self.stop_hotkey,
            if self.enable_waiting_list { "yes" } else { "no" },
            if self.roi_enabled { "on" } else { "off" },
            self.reservation_scan_timeout_sec,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let mut c = RunConfig::default();
        c.validate().unwrap();
        assert_eq!(c.start_hotkey, "f9");
        assert_eq!(c.confidence_floor("booking-offer"), Some(0.92));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = RunConfig::load_with_env(&dir.path().join("nope.json"), env_of(&[])).unwrap();
        assert_eq!(c.stop_hotkey, "esc");
    }

    #[test]
    fn file_values_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "start_hotkey": " F8 ", "enable_waiting_list": false }"#).unwrap();
        let c = RunConfig::load_with_env(&path, env_of(&[("ENABLE_WAITING_LIST", "yes"), ("STOP_HOTKEY", "")]))
            .unwrap();
        assert_eq!(c.start_hotkey, "f8");
        assert_eq!(c.stop_hotkey, "esc");
        assert!(c.enable_waiting_list);
    }

    #[test]
    fn malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = RunConfig::load_with_env(&path, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn identical_hotkeys_rejected() {
        let mut c = RunConfig { start_hotkey: "ESC".into(), ..RunConfig::default() };
        assert!(matches!(c.validate(), Err(ConfigError::Conflict(_))));
    }

    #[test]
    fn telegram_requires_credentials() {
        let mut c = RunConfig {
            enable_telegram_notification: true,
            telegram_bot_token: Some("  ".into()),
            telegram_chat_id: Some("42".into()),
            ..RunConfig::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Conflict(_))));

        c.telegram_bot_token = Some("123:abc".into());
        c.validate().unwrap();
    }

    #[test]
    fn pacing_intervals_have_a_floor() {
        let mut c = RunConfig { search_poll_ms: 0, ..RunConfig::default() };
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "search_poll_ms", .. })));

        let mut c = RunConfig { refresh_idle_ms: 5, ..RunConfig::default() };
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "refresh_idle_ms", .. })));

        let mut c = RunConfig { debounce_ms: 60_000, ..RunConfig::default() };
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { field: "debounce_ms", .. })));

        let mut c = RunConfig { search_poll_ms: 10, refresh_idle_ms: 10, ..RunConfig::default() };
        c.validate().unwrap();
    }

    #[test]
    fn bad_env_values_are_config_faults() {
        let mut c = RunConfig::default();
        let err = c.apply_env(env_of(&[("ROI_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "ROI_ENABLED", .. }));

        let err = c.apply_env(env_of(&[("IMAGE_MATCH_CONFIDENCE", "high")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let mut c = RunConfig { image_match_confidence: 0.999, ..RunConfig::default() };
        assert!(c.validate().is_err());
    }
}
