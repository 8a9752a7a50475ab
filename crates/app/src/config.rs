//! Environment configuration.
//!
//! Every setting is a `BILLNOTIFY_*` variable. Required: backend URL, user
//! and password, gateway URL, the safety floor date, and the test destination
//! unless the mode is `production`. Everything else has a default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use billnotify_backend::{BackendConfig, Credentials};
use billnotify_core::{
    DeliveryMode, Destination, DomainError, NotifierConfig, PhoneRules, TemplateChoice,
};
use billnotify_observability::LogFormat;
use billnotify_supervisor::{SupervisorConfig, WorkerSpec};

pub const BACKEND_URL: &str = "BILLNOTIFY_BACKEND_URL";
pub const BACKEND_USER: &str = "BILLNOTIFY_BACKEND_USER";
pub const BACKEND_PASSWORD: &str = "BILLNOTIFY_BACKEND_PASSWORD";
pub const BACKEND_TIMEOUT_SECS: &str = "BILLNOTIFY_BACKEND_TIMEOUT_SECS";
pub const GATEWAY_URL: &str = "BILLNOTIFY_GATEWAY_URL";
pub const GATEWAY_POLL_MS: &str = "BILLNOTIFY_GATEWAY_POLL_MS";
pub const CREDENTIAL_DIR: &str = "BILLNOTIFY_CREDENTIAL_DIR";
pub const ATTACHMENT_DIR: &str = "BILLNOTIFY_ATTACHMENT_DIR";
pub const LOG_FORMAT: &str = "BILLNOTIFY_LOG_FORMAT";

pub const MODE: &str = "BILLNOTIFY_MODE";
pub const TEST_DESTINATION: &str = "BILLNOTIFY_TEST_DESTINATION";
pub const SINCE_DATE: &str = "BILLNOTIFY_SINCE_DATE";
pub const POLL_INTERVAL_SECS: &str = "BILLNOTIFY_POLL_INTERVAL_SECS";
pub const BATCH_LIMIT: &str = "BILLNOTIFY_BATCH_LIMIT";
pub const PAGE_SIZE: &str = "BILLNOTIFY_PAGE_SIZE";
pub const INTER_MESSAGE_DELAY_MS: &str = "BILLNOTIFY_INTER_MESSAGE_DELAY_MS";
pub const MAX_SEND_ATTEMPTS: &str = "BILLNOTIFY_MAX_SEND_ATTEMPTS";
pub const TEMPLATE_A: &str = "BILLNOTIFY_TEMPLATE_A";
pub const TEMPLATE_B: &str = "BILLNOTIFY_TEMPLATE_B";
pub const SALES_REP_NAME: &str = "BILLNOTIFY_SALES_REP_NAME";
pub const SALES_REP_PHONE: &str = "BILLNOTIFY_SALES_REP_PHONE";
pub const DEFAULT_COUNTRY_CODE: &str = "BILLNOTIFY_DEFAULT_COUNTRY_CODE";
pub const LOCAL_NUMBER_LENGTH: &str = "BILLNOTIFY_LOCAL_NUMBER_LENGTH";
pub const CHANNEL_READY_GRACE_SECS: &str = "BILLNOTIFY_CHANNEL_READY_GRACE_SECS";
pub const ATTACHMENT_MAX_BYTES: &str = "BILLNOTIFY_ATTACHMENT_MAX_BYTES";
pub const RECORD_TEST_DELIVERIES: &str = "BILLNOTIFY_RECORD_TEST_DELIVERIES";
pub const CHANNEL_DOWN_ALERT_AFTER: &str = "BILLNOTIFY_CHANNEL_DOWN_ALERT_AFTER";

pub const RESTART_BACKOFF_SECS: &str = "BILLNOTIFY_RESTART_BACKOFF_SECS";
pub const SHUTDOWN_GRACE_SECS: &str = "BILLNOTIFY_SHUTDOWN_GRACE_SECS";

const DEFAULT_CREDENTIAL_DIR: &str = "channel-session";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Everything one worker process needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub gateway_url: String,
    pub gateway_poll_interval: Duration,
    /// Holds the paired channel credential and its lock file.
    pub credential_dir: PathBuf,
    /// PDFs named `<document number>.pdf`; text-only sends when unset.
    pub attachment_dir: Option<PathBuf>,
    pub notifier: NotifierConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let mut backend = BackendConfig::new(
            vars.required(BACKEND_URL)?,
            Credentials {
                username: vars.required(BACKEND_USER)?,
                password: vars.required(BACKEND_PASSWORD)?,
            },
        );
        if let Some(secs) = vars.parsed::<u64>(BACKEND_TIMEOUT_SECS)? {
            backend = backend.with_timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            backend,
            gateway_url: vars.required(GATEWAY_URL)?,
            gateway_poll_interval: vars
                .parsed::<u64>(GATEWAY_POLL_MS)?
                .map_or(Duration::from_secs(1), Duration::from_millis),
            credential_dir: vars
                .get(CREDENTIAL_DIR)
                .map_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_DIR), PathBuf::from),
            attachment_dir: vars.get(ATTACHMENT_DIR).map(PathBuf::from),
            notifier: notifier_config(&vars)?,
        })
    }
}

fn notifier_config<F>(vars: &Vars<F>) -> Result<NotifierConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let since = vars.required(SINCE_DATE)?;
    let since_date = NaiveDate::parse_from_str(&since, "%Y-%m-%d")
        .map_err(|e| ConfigError::invalid(SINCE_DATE, format!("expected YYYY-MM-DD: {e}")))?;

    let mut config = NotifierConfig::new(since_date);

    if let Some(mode) = vars.get(MODE) {
        config.delivery_mode = mode.parse::<DeliveryMode>()?;
    }
    if let Some(raw) = vars.get(TEST_DESTINATION) {
        config.test_destination = Some(
            Destination::parse(&raw).map_err(|e| ConfigError::invalid(TEST_DESTINATION, e.to_string()))?,
        );
    }
    if let Some(secs) = vars.parsed::<u64>(POLL_INTERVAL_SECS)? {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(n) = vars.parsed(BATCH_LIMIT)? {
        config.batch_limit = n;
    }
    if let Some(n) = vars.parsed(PAGE_SIZE)? {
        config.page_size = n;
    }
    if let Some(ms) = vars.parsed::<u64>(INTER_MESSAGE_DELAY_MS)? {
        config.inter_message_delay = Duration::from_millis(ms);
    }
    if let Some(n) = vars.parsed(MAX_SEND_ATTEMPTS)? {
        config.max_send_attempts = n;
    }
    if let Some(raw) = vars.get(TEMPLATE_A) {
        config.templates.category_a = template(TEMPLATE_A, &raw)?;
    }
    if let Some(raw) = vars.get(TEMPLATE_B) {
        config.templates.category_b = template(TEMPLATE_B, &raw)?;
    }
    if let Some(name) = vars.get(SALES_REP_NAME) {
        config.sales_rep.name = name;
    }
    config.sales_rep.phone = vars.get(SALES_REP_PHONE);

    let mut rules = PhoneRules {
        default_country_code: vars.get(DEFAULT_COUNTRY_CODE),
        ..PhoneRules::default()
    };
    if let Some(n) = vars.parsed(LOCAL_NUMBER_LENGTH)? {
        rules.local_length = n;
    }
    config.phone_rules = rules;

    if let Some(secs) = vars.parsed::<u64>(CHANNEL_READY_GRACE_SECS)? {
        config.channel_ready_grace = Duration::from_secs(secs);
    }
    if let Some(n) = vars.parsed(ATTACHMENT_MAX_BYTES)? {
        config.attachment_max_bytes = n;
    }
    if let Some(flag) = vars.get(RECORD_TEST_DELIVERIES) {
        config.record_test_deliveries = boolean(RECORD_TEST_DELIVERIES, &flag)?;
    }
    if let Some(n) = vars.parsed(CHANNEL_DOWN_ALERT_AFTER)? {
        config.channel_down.alert_after_ticks = n;
    }

    config.validate()?;
    Ok(config)
}

/// Log format chosen for this process; JSON unless told otherwise.
pub fn log_format_from_env() -> LogFormat {
    std::env::var(LOG_FORMAT)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default()
}

/// Settings for the supervisor binary.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub supervisor: SupervisorConfig,
    pub workers: Vec<WorkerSpec>,
}

impl SupervisorSettings {
    /// Workers come from `name=command [args...]` arguments. With none, a
    /// single `notifier` worker runs `default_worker`.
    pub fn from_args<F, I>(lookup: F, args: I, default_worker: &str) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = String>,
    {
        let vars = Vars(lookup);
        let mut supervisor = SupervisorConfig::default();
        if let Some(secs) = vars.parsed::<u64>(RESTART_BACKOFF_SECS)? {
            supervisor.restart_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = vars.parsed::<u64>(SHUTDOWN_GRACE_SECS)? {
            supervisor.shutdown_grace = Duration::from_secs(secs);
        }

        let mut workers = args
            .into_iter()
            .map(|arg| parse_worker(&arg))
            .collect::<Result<Vec<_>, _>>()?;
        if workers.is_empty() {
            workers.push(WorkerSpec::new("notifier", default_worker));
        }

        Ok(Self { supervisor, workers })
    }
}

fn parse_worker(arg: &str) -> Result<WorkerSpec, ConfigError> {
    let invalid = || ConfigError::invalid("worker", format!("expected name=command [args], got `{arg}`"));
    let (name, command_line) = arg.split_once('=').ok_or_else(invalid)?;
    let mut parts = command_line.split_whitespace();
    let command = parts.next().ok_or_else(invalid)?;
    if name.trim().is_empty() {
        return Err(invalid());
    }
    Ok(WorkerSpec::new(name.trim(), command).args(parts))
}

fn template(var: &'static str, raw: &str) -> Result<TemplateChoice, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "detailed" => Ok(TemplateChoice::Detailed),
        "compact" => Ok(TemplateChoice::Compact),
        other => Err(ConfigError::invalid(var, format!("unknown template `{other}`"))),
    }
}

fn boolean(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(var, format!("expected a boolean, got `{other}`"))),
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        self.get(key)
            .map(|raw| raw.parse::<T>().map_err(|e| ConfigError::invalid(key, e.to_string())))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (BACKEND_URL, "http://backend.local/"),
            (BACKEND_USER, "notifier"),
            (BACKEND_PASSWORD, "s3cret"),
            (GATEWAY_URL, "http://127.0.0.1:3000"),
            (SINCE_DATE, "2024-01-01"),
            (TEST_DESTINATION, "+1 555 000 0000"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_vars(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn minimal_environment_defaults_to_test_mode() {
        let cfg = load(&base()).unwrap();
        assert_eq!(cfg.backend.base_url, "http://backend.local");
        assert_eq!(cfg.notifier.delivery_mode, DeliveryMode::Test);
        assert_eq!(
            cfg.notifier.test_destination,
            Some(Destination::parse("15550000000@c.us").unwrap())
        );
        assert_eq!(cfg.notifier.poll_interval, Duration::from_secs(3600));
        assert_eq!(cfg.credential_dir, PathBuf::from("channel-session"));
        assert!(cfg.attachment_dir.is_none());
        assert!(!cfg.notifier.record_test_deliveries);
    }

    #[test]
    fn missing_required_variable_is_named() {
        let mut vars = base();
        vars.remove(BACKEND_PASSWORD);
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing(BACKEND_PASSWORD));

        let mut vars = base();
        vars.insert(GATEWAY_URL, "   ");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing(GATEWAY_URL));
    }

    #[test]
    fn test_mode_without_destination_fails_validation() {
        let mut vars = base();
        vars.remove(TEST_DESTINATION);
        assert!(matches!(load(&vars), Err(ConfigError::Domain(DomainError::Config(_)))));
    }

    #[test]
    fn production_settings_are_applied() {
        let mut vars = base();
        vars.remove(TEST_DESTINATION);
        vars.extend([
            (MODE, "production"),
            (POLL_INTERVAL_SECS, "900"),
            (INTER_MESSAGE_DELAY_MS, "1500"),
            (MAX_SEND_ATTEMPTS, "5"),
            (TEMPLATE_A, "compact"),
            (SALES_REP_NAME, "Marta"),
            (SALES_REP_PHONE, "55 1111 2222"),
            (DEFAULT_COUNTRY_CODE, "52"),
            (ATTACHMENT_DIR, "/srv/pdf"),
            (CHANNEL_DOWN_ALERT_AFTER, "6"),
        ]);

        let cfg = load(&vars).unwrap();
        let n = &cfg.notifier;
        assert_eq!(n.delivery_mode, DeliveryMode::Production);
        assert_eq!(n.poll_interval, Duration::from_secs(900));
        assert_eq!(n.inter_message_delay, Duration::from_millis(1500));
        assert_eq!(n.max_send_attempts, 5);
        assert_eq!(n.templates.category_a, TemplateChoice::Compact);
        assert_eq!(n.templates.category_b, TemplateChoice::Detailed);
        assert_eq!(n.sales_rep.name, "Marta");
        assert_eq!(n.sales_rep.phone.as_deref(), Some("55 1111 2222"));
        assert_eq!(n.phone_rules.default_country_code.as_deref(), Some("52"));
        assert_eq!(n.channel_down.alert_after_ticks, 6);
        assert_eq!(cfg.attachment_dir, Some(PathBuf::from("/srv/pdf")));
    }

    #[test]
    fn malformed_values_are_rejected_with_the_variable_name() {
        let mut vars = base();
        vars.insert(SINCE_DATE, "01/02/2024");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { var: SINCE_DATE, .. })));

        let mut vars = base();
        vars.insert(BATCH_LIMIT, "many");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { var: BATCH_LIMIT, .. })));

        let mut vars = base();
        vars.insert(RECORD_TEST_DELIVERIES, "maybe");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: RECORD_TEST_DELIVERIES, .. })
        ));

        let mut vars = base();
        vars.insert(MODE, "staging");
        assert!(matches!(load(&vars), Err(ConfigError::Domain(_))));
    }

    #[test]
    fn supervisor_defaults_to_one_notifier_worker() {
        let settings = SupervisorSettings::from_args(|_| None, Vec::new(), "/usr/bin/billnotify-worker").unwrap();
        assert_eq!(settings.supervisor, SupervisorConfig::default());
        assert_eq!(settings.workers, vec![WorkerSpec::new("notifier", "/usr/bin/billnotify-worker")]);
    }

    #[test]
    fn supervisor_parses_worker_arguments() {
        let env = HashMap::from([(RESTART_BACKOFF_SECS, "2")]);
        let settings = SupervisorSettings::from_args(
            |key| env.get(key).map(|v| v.to_string()),
            vec!["east=/opt/worker --profile east".to_string(), "west=/opt/worker".to_string()],
            "unused",
        )
        .unwrap();

        assert_eq!(settings.supervisor.restart_backoff, Duration::from_secs(2));
        assert_eq!(settings.workers[0].name, "east");
        assert_eq!(settings.workers[0].args, vec!["--profile", "east"]);
        assert!(settings.workers[1].args.is_empty());

        let err = SupervisorSettings::from_args(|_| None, vec!["no-command".to_string()], "x").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "worker", .. }));
    }
}
