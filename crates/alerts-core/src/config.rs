//! Configuration: TOML file overlaid with environment / Docker secret keys.
//!
//! Precedence (highest first): Docker secret, environment variable, TOML
//! file, built-in default. Loaded once at startup; the running process never
//! reloads it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AlertsError, Result};
use crate::secrets::SecretResolver;
use crate::types::EventFilter;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "alerts.toml";

const MASK: &str = "••••••••";

/// Upper bound for any retention window, in days.
pub const MAX_RETENTION_DAYS: f64 = 36_500.0;

/// Zone used when rendering timestamps unless configured otherwise.
pub const DEFAULT_TIMEZONE: &str = "Europe/Athens";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub filter: EventFilter,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub teams_email: TeamsEmailConfig,
    #[serde(default)]
    pub teams: TeamsConfig,
    #[serde(default)]
    pub branding: BrandingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hours between cycle starts (fractional allowed).
    #[serde(default = "default_frequency_hours")]
    pub frequency_hours: f64,
    /// Minimum days before an already-notified event is sent again.
    #[serde(default = "default_reminder_days")]
    pub reminder_frequency_days: f64,
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    /// Upper bound for one channel call, retries included.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Drop fingerprint records not notified for this many days.
    #[serde(default)]
    pub retention_days: Option<f64>,
    #[serde(default = "default_sweep_hours")]
    pub retention_sweep_hours: f64,
}

fn default_frequency_hours() -> f64 {
    1.0
}
fn default_reminder_days() -> f64 {
    3.0
}
fn default_source_timeout() -> u64 {
    120
}
fn default_send_timeout() -> u64 {
    90
}
fn default_sweep_hours() -> f64 {
    24.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency_hours: default_frequency_hours(),
            reminder_frequency_days: default_reminder_days(),
            source_timeout_secs: default_source_timeout(),
            send_timeout_secs: default_send_timeout(),
            retention_days: None,
            retention_sweep_hours: default_sweep_hours(),
        }
    }
}

impl ScheduleConfig {
    pub fn frequency(&self) -> Result<Duration> {
        positive_duration("schedule.frequency_hours", self.frequency_hours * 3600.0)
    }

    pub fn reminder_interval(&self) -> Result<chrono::Duration> {
        let d = positive_duration(
            "schedule.reminder_frequency_days",
            self.reminder_frequency_days * 86_400.0,
        )?;
        chrono::Duration::from_std(d)
            .map_err(|e| AlertsError::config(format!("schedule.reminder_frequency_days: {e}")))
    }

    pub fn retention(&self) -> Result<Option<chrono::Duration>> {
        let Some(days) = self.retention_days else {
            return Ok(None);
        };
        if days > MAX_RETENTION_DAYS {
            return Err(AlertsError::config(format!(
                "schedule.retention_days must be at most {MAX_RETENTION_DAYS}, got {days}"
            )));
        }
        let d = positive_duration("schedule.retention_days", days * 86_400.0)?;
        chrono::Duration::from_std(d)
            .map(Some)
            .map_err(|e| AlertsError::config(format!("schedule.retention_days: {e}")))
    }

    pub fn retention_sweep(&self) -> Result<Duration> {
        positive_duration("schedule.retention_sweep_hours", self.retention_sweep_hours * 3600.0)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }
}

fn positive_duration(key: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(AlertsError::config(format!("{key} must be a positive number")));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| AlertsError::config(format!("{key}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/sent_events.json".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_queries_dir")]
    pub queries_dir: String,
    #[serde(default = "default_query_file")]
    pub query_file: String,
    /// Query resolving the event type's display name; unset disables the lookup.
    #[serde(default = "default_type_name_query_file")]
    pub type_name_query_file: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub ssh: SshTunnelConfig,
}

fn default_db_port() -> u16 {
    5432
}
fn default_queries_dir() -> String {
    "queries".into()
}
fn default_query_file() -> String {
    "EventHotWork.sql".into()
}
fn default_type_name_query_file() -> Option<String> {
    Some("get_events_name.sql".into())
}

fn default_max_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_db_port(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            queries_dir: default_queries_dir(),
            query_file: default_query_file(),
            type_name_query_file: default_type_name_query_file(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            ssh: SshTunnelConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn query_path(&self) -> PathBuf {
        expand_path(&self.queries_dir).join(&self.query_file)
    }

    pub fn type_name_query_path(&self) -> Option<PathBuf> {
        let file = self
            .type_name_query_file
            .as_deref()
            .filter(|f| !f.trim().is_empty())?;
        Some(expand_path(&self.queries_dir).join(file))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub key_path: String,
    /// Local forward port; 0 picks a free one.
    #[serde(default)]
    pub local_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for SshTunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_ssh_port(),
            user: String::new(),
            key_path: String::new(),
            local_port: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_password: String,
    /// Sender address; defaults to `smtp_user`.
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_true() -> bool {
    true
}
fn default_smtp_port() -> u16 {
    465
}
fn default_transport_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    2
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_password: String::new(),
            from: None,
            recipients: vec![],
            timeout_secs: default_transport_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl EmailConfig {
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.smtp_user)
    }
}

/// Email addressed to a Teams channel mailbox (shares the SMTP settings).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsEmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for TeamsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            timeout_secs: default_transport_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandingConfig {
    #[serde(default = "default_company")]
    pub company_name: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Human name of the event type, used in subjects and headings.
    ///
    /// Fallback for when the database lookup is disabled or fails.
    #[serde(default = "default_type_name")]
    pub event_type_name: String,
    /// IANA zone for rendered timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Base URL; the event id is appended to build a link.
    #[serde(default)]
    pub event_link_base: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default = "default_media_dir")]
    pub media_dir: String,
    #[serde(default)]
    pub company_logo: Option<String>,
    #[serde(default)]
    pub st_company_logo: Option<String>,
}

fn default_company() -> String {
    "Company".into()
}
fn default_subject_prefix() -> String {
    "AlertDev".into()
}
fn default_type_name() -> String {
    "Event".into()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.into()
}

fn default_media_dir() -> String {
    "media".into()
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            company_name: default_company(),
            subject_prefix: default_subject_prefix(),
            event_type_name: default_type_name(),
            timezone: default_timezone(),
            event_link_base: None,
            contact_email: None,
            media_dir: default_media_dir(),
            company_logo: None,
            st_company_logo: None,
        }
    }
}

impl BrandingConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse()
            .map_err(|_| AlertsError::config(format!("unknown timezone '{}'", self.timezone)))
    }

    pub fn company_logo_path(&self) -> Option<PathBuf> {
        self.media_path(self.company_logo.as_deref())
    }

    pub fn st_company_logo_path(&self) -> Option<PathBuf> {
        self.media_path(self.st_company_logo.as_deref())
    }

    fn media_path(&self, file: Option<&str>) -> Option<PathBuf> {
        let file = file.filter(|f| !f.trim().is_empty())?;
        Some(expand_path(&self.media_dir).join(file))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rotating log files; console only when unset.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default = "default_log_files")]
    pub max_files: usize,
}

fn default_log_file() -> String {
    "events_alerts.log".into()
}
fn default_log_files() -> usize {
    5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: Some("logs".into()),
            file: default_log_file(),
            max_files: default_log_files(),
        }
    }
}

impl AlertsConfig {
    /// Load from an explicit path, or from `alerts.toml` when it exists.
    ///
    /// Environment and Docker secret keys are overlaid afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        let resolver = SecretResolver::default();
        config.apply_overrides(|key| resolver.lookup(key))?;
        Ok(config)
    }

    /// Parse a TOML file without overlays.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AlertsError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| AlertsError::config(format!("{}: {e}", path.display())))
    }

    /// Overlay keys resolved by `lookup` on top of the file values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        // Scheduling
        if let Some(v) = get("SCHEDULE_FREQUENCY") {
            self.schedule.frequency_hours = parse_value("SCHEDULE_FREQUENCY", &v)?;
        }
        if let Some(v) = get("REMINDER_FREQUENCY_DAYS") {
            self.schedule.reminder_frequency_days = parse_value("REMINDER_FREQUENCY_DAYS", &v)?;
        }
        if let Some(v) = get("RETENTION_DAYS") {
            self.schedule.retention_days = Some(parse_value("RETENTION_DAYS", &v)?);
        }
        if let Some(v) = get("SENT_EVENTS_FILE") {
            self.store.path = v;
        }

        // Query filter
        if let Some(v) = get("EVENT_TYPE_ID") {
            self.filter.type_id = parse_value("EVENT_TYPE_ID", &v)?;
        }
        if let Some(v) = get("EVENT_STATUS_ID") {
            self.filter.status_id = Some(parse_value("EVENT_STATUS_ID", &v)?);
        }
        if let Some(v) = get("EVENT_NAME_FILTER") {
            self.filter.name_filter = v;
        }
        if let Some(v) = get("EVENT_EXCLUDE") {
            self.filter.name_excluded = v;
        }
        if let Some(v) = get("EVENT_LOOKBACK_DAYS") {
            self.filter.lookback_days = parse_value("EVENT_LOOKBACK_DAYS", &v)?;
        }

        // Database
        if let Some(v) = get("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            self.database.port = parse_value("DB_PORT", &v)?;
        }
        if let Some(v) = get("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("DB_PASS") {
            self.database.password = v;
        }
        if let Some(v) = get("SQL_QUERY_FILE") {
            self.database.query_file = v;
        }
        if let Some(v) = get("SQL_TYPE_NAME_QUERY_FILE") {
            self.database.type_name_query_file = Some(v).filter(|f| !f.is_empty());
        }
        if let Some(v) = get("USE_SSH_TUNNEL") {
            self.database.ssh.enabled = parse_bool("USE_SSH_TUNNEL", &v)?;
        }
        if let Some(v) = get("SSH_HOST") {
            self.database.ssh.host = v;
        }
        if let Some(v) = get("SSH_PORT") {
            self.database.ssh.port = parse_value("SSH_PORT", &v)?;
        }
        if let Some(v) = get("SSH_USER") {
            self.database.ssh.user = v;
        }
        if let Some(v) = get("SSH_KEY_PATH") {
            self.database.ssh.key_path = v;
        }

        // Email
        if let Some(v) = get("ENABLE_EMAIL_ALERTS") {
            self.email.enabled = parse_bool("ENABLE_EMAIL_ALERTS", &v)?;
        }
        if let Some(v) = get("SMTP_HOST") {
            self.email.smtp_host = v;
        }
        if let Some(v) = get("SMTP_PORT") {
            self.email.smtp_port = parse_value("SMTP_PORT", &v)?;
        }
        if let Some(v) = get("SMTP_USER") {
            self.email.smtp_user = v;
        }
        if let Some(v) = get("SMTP_PASS") {
            self.email.smtp_password = v;
        }
        if let Some(v) = get("INTERNAL_RECIPIENTS") {
            self.email.recipients = split_list(&v);
        }
        if let Some(v) = get("ENABLE_SPECIAL_TEAMS_EMAIL_ALERT") {
            self.teams_email.enabled = parse_bool("ENABLE_SPECIAL_TEAMS_EMAIL_ALERT", &v)?;
        }
        if let Some(v) = get("SPECIAL_TEAMS_EMAIL") {
            self.teams_email.address = v;
        }

        // Teams webhook
        if let Some(v) = get("ENABLE_TEAMS_ALERTS") {
            self.teams.enabled = parse_bool("ENABLE_TEAMS_ALERTS", &v)?;
        }
        if let Some(v) = get("TEAMS_WEBHOOK_URL") {
            self.teams.webhook_url = v;
        }

        // Branding
        if let Some(v) = get("COMPANY_NAME") {
            self.branding.company_name = v;
        }
        if let Some(v) = get("EVENT_TYPE_NAME") {
            self.branding.event_type_name = v;
        }
        if let Some(v) = get("LOCAL_TIMEZONE") {
            self.branding.timezone = v;
        }
        if let Some(v) = get("COMPANY_LOGO") {
            self.branding.company_logo = Some(v);
        }
        if let Some(v) = get("ST_COMPANY_LOGO") {
            self.branding.st_company_logo = Some(v);
        }
        if let Some(v) = get("EVENT_LINK_BASE") {
            self.branding.event_link_base = Some(v);
        }

        // Logging
        if let Some(v) = get("LOG_DIR") {
            self.logging.dir = Some(v);
        }
        if let Some(v) = get("LOG_FILE") {
            self.logging.file = v;
        }
        if let Some(v) = get("LOG_BACKUP_COUNT") {
            self.logging.max_files = parse_value("LOG_BACKUP_COUNT", &v)?;
        }

        Ok(())
    }

    /// Check everything the polling loop needs before it starts.
    pub fn validate(&self) -> Result<()> {
        self.schedule.frequency()?;
        self.schedule.reminder_interval()?;
        self.schedule.retention()?;
        self.schedule.retention_sweep()?;
        self.branding.tz()?;

        if self.filter.lookback_days <= 0 {
            return Err(AlertsError::config("filter.lookback_days must be positive"));
        }

        let db = &self.database;
        for (key, value) in [
            ("DB_HOST", &db.host),
            ("DB_NAME", &db.name),
            ("DB_USER", &db.user),
        ] {
            if value.trim().is_empty() {
                return Err(missing(key));
            }
        }
        if db.ssh.enabled && (db.ssh.host.trim().is_empty() || db.ssh.key_path.trim().is_empty())
        {
            return Err(AlertsError::config(
                "SSH tunnel enabled but SSH_HOST or SSH_KEY_PATH is missing",
            ));
        }

        if self.email.enabled || self.teams_email.enabled {
            let email = &self.email;
            for (key, value) in [
                ("SMTP_HOST", &email.smtp_host),
                ("SMTP_USER", &email.smtp_user),
                ("SMTP_PASS", &email.smtp_password),
            ] {
                if value.trim().is_empty() {
                    return Err(missing(key));
                }
            }
        }
        if self.email.enabled && self.email.recipients.is_empty() {
            return Err(AlertsError::config(
                "Email alerts enabled but INTERNAL_RECIPIENTS is empty",
            ));
        }
        if self.teams_email.enabled && self.teams_email.address.trim().is_empty() {
            return Err(AlertsError::config(
                "Teams email alerts enabled but SPECIAL_TEAMS_EMAIL is empty",
            ));
        }
        if self.teams.enabled {
            url::Url::parse(&self.teams.webhook_url)
                .map_err(|e| AlertsError::config(format!("TEAMS_WEBHOOK_URL is invalid: {e}")))?;
        }
        Ok(())
    }

    /// Effective configuration as TOML with credentials masked.
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut masked = self.clone();
        mask(&mut masked.database.password);
        mask(&mut masked.email.smtp_password);
        mask(&mut masked.teams.webhook_url);
        toml::to_string_pretty(&masked)
            .map_err(|e| AlertsError::Other(format!("Serialize config: {e}")))
    }
}

fn missing(key: &str) -> AlertsError {
    AlertsError::config(format!("Required configuration '{key}' is missing"))
}

fn mask(value: &mut String) {
    if !value.is_empty() {
        *value = MASK.to_string();
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| AlertsError::config(format!("{key}='{raw}': {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" | "t" => Ok(true),
        "0" | "false" | "no" | "n" | "off" | "f" | "" => Ok(false),
        _ => Err(AlertsError::config(format!("{key}='{raw}' is not a boolean"))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Expand `~` and environment references in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}
