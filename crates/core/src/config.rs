use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::ApprovalOrder;
use crate::completeness::RequiredDocumentsPolicy;
use crate::domain::documents::DocumentKind;
use crate::notifications::{NotificationScenario, TemplateIds};

pub const DEFAULT_CONFIG_FILE: &str = "resourcing.toml";
pub const NESTED_CONFIG_FILE: &str = "config/resourcing.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub site: SiteConfig,
    pub notify: NotifyConfig,
    pub worker: WorkerConfig,
    pub documents: DocumentsConfig,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SiteConfig {
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub mode: NotifyMode,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub templates: TemplateIds,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub batch_size: u32,
}

#[derive(Clone, Debug)]
pub struct DocumentsConfig {
    pub required_for_submission: Vec<DocumentKind>,
    pub required_for_completion: Vec<DocumentKind>,
}

#[derive(Clone, Debug)]
pub struct ApprovalConfig {
    pub order: ApprovalOrder,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    LogOnly,
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub site_base_url: Option<String>,
    pub notify_mode: Option<NotifyMode>,
    pub notify_api_key: Option<String>,
    pub worker_poll_interval_ms: Option<u64>,
    pub worker_max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let documents = RequiredDocumentsPolicy::default();
        Self {
            database: DatabaseConfig {
                url: "sqlite://resourcing.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            site: SiteConfig { base_url: "http://localhost:8000".to_string() },
            notify: NotifyConfig {
                mode: NotifyMode::LogOnly,
                api_key: None,
                base_url: "https://api.notifications.service.gov.uk".to_string(),
                timeout_secs: 10,
                templates: TemplateIds::default(),
            },
            worker: WorkerConfig {
                poll_interval_ms: 1_000,
                max_attempts: 5,
                retry_delay_secs: 60,
                batch_size: 20,
            },
            documents: DocumentsConfig {
                required_for_submission: documents.required_for_submission.into_iter().collect(),
                required_for_completion: documents.required_for_completion.into_iter().collect(),
            },
            approval: ApprovalConfig { order: ApprovalOrder::default() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for NotifyMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "log_only" | "log" => Ok(Self::LogOnly),
            "live" => Ok(Self::Live),
            other => Err(ConfigError::Validation(format!(
                "unsupported notify mode `{other}` (expected log_only|live)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn documents_policy(&self) -> RequiredDocumentsPolicy {
        RequiredDocumentsPolicy::new(
            self.documents.required_for_submission.iter().copied(),
            self.documents.required_for_completion.iter().copied(),
        )
    }

    pub fn approval_order(&self) -> &ApprovalOrder {
        &self.approval.order
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(site) = patch.site {
            if let Some(base_url) = site.base_url {
                self.site.base_url = base_url;
            }
        }

        if let Some(notify) = patch.notify {
            if let Some(mode) = notify.mode {
                self.notify.mode = mode;
            }
            if let Some(notify_api_key_value) = notify.api_key {
                self.notify.api_key = Some(secret_value(notify_api_key_value));
            }
            if let Some(base_url) = notify.base_url {
                self.notify.base_url = base_url;
            }
            if let Some(timeout_secs) = notify.timeout_secs {
                self.notify.timeout_secs = timeout_secs;
            }
            if let Some(templates) = notify.templates {
                templates.apply_to(&mut self.notify.templates);
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(poll_interval_ms) = worker.poll_interval_ms {
                self.worker.poll_interval_ms = poll_interval_ms;
            }
            if let Some(max_attempts) = worker.max_attempts {
                self.worker.max_attempts = max_attempts;
            }
            if let Some(retry_delay_secs) = worker.retry_delay_secs {
                self.worker.retry_delay_secs = retry_delay_secs;
            }
            if let Some(batch_size) = worker.batch_size {
                self.worker.batch_size = batch_size;
            }
        }

        if let Some(documents) = patch.documents {
            if let Some(keys) = documents.required_for_submission {
                self.documents.required_for_submission =
                    parse_document_kinds("documents.required_for_submission", &keys)?;
            }
            if let Some(keys) = documents.required_for_completion {
                self.documents.required_for_completion =
                    parse_document_kinds("documents.required_for_completion", &keys)?;
            }
        }

        if let Some(approval) = patch.approval {
            if let Some(order) = approval.order {
                self.approval.order = parse_approval_order(&order)?;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RESOURCING_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RESOURCING_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("RESOURCING_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RESOURCING_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RESOURCING_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RESOURCING_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RESOURCING_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("RESOURCING_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("RESOURCING_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RESOURCING_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("RESOURCING_SITE_BASE_URL") {
            self.site.base_url = value;
        }

        if let Some(value) = read_env("RESOURCING_NOTIFY_MODE") {
            self.notify.mode = value.parse()?;
        }
        if let Some(value) = read_env("RESOURCING_NOTIFY_API_KEY") {
            self.notify.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("RESOURCING_NOTIFY_BASE_URL") {
            self.notify.base_url = value;
        }
        if let Some(value) = read_env("RESOURCING_NOTIFY_TIMEOUT_SECS") {
            self.notify.timeout_secs = parse_u64("RESOURCING_NOTIFY_TIMEOUT_SECS", &value)?;
        }
        for scenario in NotificationScenario::ALL {
            let key = format!("RESOURCING_NOTIFY_TEMPLATE_{}", scenario.as_str().to_uppercase());
            if let Some(value) = read_env(&key) {
                *self.notify.templates.template_mut(scenario) = value;
            }
        }

        if let Some(value) = read_env("RESOURCING_WORKER_POLL_INTERVAL_MS") {
            self.worker.poll_interval_ms = parse_u64("RESOURCING_WORKER_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("RESOURCING_WORKER_MAX_ATTEMPTS") {
            self.worker.max_attempts = parse_u32("RESOURCING_WORKER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("RESOURCING_WORKER_RETRY_DELAY_SECS") {
            self.worker.retry_delay_secs = parse_u64("RESOURCING_WORKER_RETRY_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("RESOURCING_WORKER_BATCH_SIZE") {
            self.worker.batch_size = parse_u32("RESOURCING_WORKER_BATCH_SIZE", &value)?;
        }

        if let Some(value) = read_env("RESOURCING_DOCUMENTS_REQUIRED_FOR_SUBMISSION") {
            self.documents.required_for_submission =
                parse_document_list("RESOURCING_DOCUMENTS_REQUIRED_FOR_SUBMISSION", &value)?;
        }
        if let Some(value) = read_env("RESOURCING_DOCUMENTS_REQUIRED_FOR_COMPLETION") {
            self.documents.required_for_completion =
                parse_document_list("RESOURCING_DOCUMENTS_REQUIRED_FOR_COMPLETION", &value)?;
        }

        // Tiers separated by `;`, members of a tier by `,`.
        if let Some(value) = read_env("RESOURCING_APPROVAL_ORDER") {
            let tiers = value
                .split(';')
                .map(|tier| tier.split(',').map(|key| key.trim().to_string()).collect())
                .collect::<Vec<Vec<String>>>();
            self.approval.order = ApprovalOrder::from_keys(&tiers).map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "RESOURCING_APPROVAL_ORDER".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        let log_level =
            read_env("RESOURCING_LOGGING_LEVEL").or_else(|| read_env("RESOURCING_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RESOURCING_LOGGING_FORMAT").or_else(|| read_env("RESOURCING_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(site_base_url) = overrides.site_base_url {
            self.site.base_url = site_base_url;
        }
        if let Some(notify_mode) = overrides.notify_mode {
            self.notify.mode = notify_mode;
        }
        if let Some(notify_api_key) = overrides.notify_api_key {
            self.notify.api_key = Some(secret_value(notify_api_key));
        }
        if let Some(poll_interval_ms) = overrides.worker_poll_interval_ms {
            self.worker.poll_interval_ms = poll_interval_ms;
        }
        if let Some(max_attempts) = overrides.worker_max_attempts {
            self.worker.max_attempts = max_attempts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_site(&self.site)?;
        validate_notify(&self.notify)?;
        validate_worker(&self.worker)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn parse_document_kinds(field: &str, keys: &[String]) -> Result<Vec<DocumentKind>, ConfigError> {
    keys.iter()
        .map(|key| {
            DocumentKind::parse(key).ok_or_else(|| {
                ConfigError::Validation(format!("{field} contains unknown document kind `{key}`"))
            })
        })
        .collect()
}

fn parse_document_list(key: &str, value: &str) -> Result<Vec<DocumentKind>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            DocumentKind::parse(item).ok_or_else(|| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn parse_approval_order(tiers: &[Vec<String>]) -> Result<ApprovalOrder, ConfigError> {
    ApprovalOrder::from_keys(tiers)
        .map_err(|error| ConfigError::Validation(format!("approval.order is invalid: {error}")))
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    if !is_http_url(&site.base_url) {
        return Err(ConfigError::Validation(
            "site.base_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_notify(notify: &NotifyConfig) -> Result<(), ConfigError> {
    if notify.timeout_secs == 0 || notify.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "notify.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if notify.mode == NotifyMode::Live {
        let missing_key = notify
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "notify.api_key is required when notify.mode is live".to_string(),
            ));
        }

        if !is_http_url(&notify.base_url) {
            return Err(ConfigError::Validation(
                "notify.base_url must start with http:// or https://".to_string(),
            ));
        }

        if let Some(scenario) = NotificationScenario::ALL
            .into_iter()
            .find(|scenario| notify.templates.template_for(*scenario).trim().is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "notify.templates.{} is required when notify.mode is live",
                scenario.as_str()
            )));
        }
    }

    Ok(())
}

const MAX_RETRY_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

fn validate_worker(worker: &WorkerConfig) -> Result<(), ConfigError> {
    if worker.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    if worker.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "worker.max_attempts must be greater than zero".to_string(),
        ));
    }
    if worker.batch_size == 0 {
        return Err(ConfigError::Validation(
            "worker.batch_size must be greater than zero".to_string(),
        ));
    }
    if worker.retry_delay_secs > MAX_RETRY_DELAY_SECS {
        return Err(ConfigError::Validation(format!(
            "worker.retry_delay_secs must be at most {MAX_RETRY_DELAY_SECS} (one week)"
        )));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    site: Option<SitePatch>,
    notify: Option<NotifyPatch>,
    worker: Option<WorkerPatch>,
    documents: Option<DocumentsPatch>,
    approval: Option<ApprovalPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SitePatch {
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifyPatch {
    mode: Option<NotifyMode>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    templates: Option<TemplatesPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct TemplatesPatch {
    ready_for_approval: Option<String>,
    approval_decision: Option<String>,
    approved: Option<String>,
    amended: Option<String>,
    amendments_reviewed: Option<String>,
    re_approval: Option<String>,
    comment_left: Option<String>,
}

impl TemplatesPatch {
    fn apply_to(self, templates: &mut TemplateIds) {
        let entries = [
            (NotificationScenario::ReadyForApproval, self.ready_for_approval),
            (NotificationScenario::ApprovalDecision, self.approval_decision),
            (NotificationScenario::Approved, self.approved),
            (NotificationScenario::Amended, self.amended),
            (NotificationScenario::AmendmentsReviewed, self.amendments_reviewed),
            (NotificationScenario::ReApproval, self.re_approval),
            (NotificationScenario::CommentLeft, self.comment_left),
        ];
        for (scenario, value) in entries {
            if let Some(value) = value {
                *templates.template_mut(scenario) = value;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    poll_interval_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
    batch_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentsPatch {
    required_for_submission: Option<Vec<String>>,
    required_for_completion: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    order: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, NotifyMode};
    use crate::domain::approval::ApprovalType;
    use crate::domain::documents::DocumentKind;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("resourcing.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_are_valid_and_log_only() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.notify.mode == NotifyMode::LogOnly, "default notify mode is log only")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )?;
        ensure(
            config.approval_order().tiers().len() == 6,
            "default approval order should have six tiers",
        )?;
        ensure(
            config.documents.required_for_completion.contains(&DocumentKind::SdsStatusDetermination),
            "sds determination is required for completion by default",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_NOTIFY_API_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[notify]
mode = "log_only"
api_key = "${TEST_NOTIFY_API_KEY}"
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .notify
                    .api_key
                    .as_ref()
                    .is_some_and(|key| key.expose_secret() == "key-from-env"),
                "api key should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_NOTIFY_API_KEY"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[site]
base_url = "${RESOURCING_TEST_UNSET_VARIABLE}"
"#,
        )?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => ensure(
                var == "RESOURCING_TEST_UNSET_VARIABLE",
                "missing variable name should be reported",
            ),
            other => Err(format!("expected interpolation failure, got {other:?}")),
        }
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RESOURCING_LOG_LEVEL", "warn");
        env::set_var("RESOURCING_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["RESOURCING_LOG_LEVEL", "RESOURCING_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RESOURCING_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("RESOURCING_SITE_BASE_URL", "https://env.example.gov.uk");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[database]
url = "sqlite://from-file.db"

[site]
base_url = "https://file.example.gov.uk"

[worker]
max_attempts = 3

[logging]
level = "warn"
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.site.base_url == "https://env.example.gov.uk",
                "env site url should win over file and defaults",
            )?;
            ensure(config.worker.max_attempts == 3, "file value should win over defaults")
        })();

        clear_vars(&["RESOURCING_DATABASE_URL", "RESOURCING_SITE_BASE_URL"]);
        result
    }

    #[test]
    fn approval_order_and_documents_are_read_from_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[documents]
required_for_submission = ["financial_information", "interim_request"]
required_for_completion = ["financial_information", "interim_request", "cest_rationale"]

[approval]
order = [
  ["head_of_profession", "chief"],
  ["busops"],
  ["hrbp", "finance", "commercial"],
  ["director", "dg_coo"],
]
"#,
        )?;

        let config =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.approval_order().tiers().len() == 4, "four configured tiers")?;
        ensure(
            config.approval_order().tier_index(ApprovalType::Chief) == Some(0),
            "chief shares the first tier",
        )?;
        let policy = config.documents_policy();
        ensure(
            policy.required_for_completion.contains(&DocumentKind::CestRationale),
            "cest rationale should be required for completion",
        )?;
        ensure(
            !policy.required_for_submission.contains(&DocumentKind::CestDocument),
            "cest document should no longer be required for submission",
        )
    }

    #[test]
    fn approval_order_missing_a_type_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[approval]
order = [["head_of_profession"], ["chief"], ["busops"], ["hrbp", "finance"], ["director"], ["dg_coo"]]
"#,
        )?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected approval order validation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("commercial")
            ),
            "validation failure should name the missing approval type",
        )
    }

    #[test]
    fn approval_order_env_override_uses_tier_separators() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var(
            "RESOURCING_APPROVAL_ORDER",
            "head_of_profession;chief;busops;hrbp,finance,commercial;director,dg_coo",
        );

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.approval_order().tiers().len() == 5, "five tiers from env")?;
            ensure(
                config.approval_order().tier_index(ApprovalType::DgCoo) == Some(4),
                "dg coo shares the final tier with director",
            )
        })();

        clear_vars(&["RESOURCING_APPROVAL_ORDER"]);
        result
    }

    #[test]
    fn live_notify_requires_api_key_and_templates() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RESOURCING_NOTIFY_MODE", "live");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("notify.api_key")
                ),
                "validation failure should mention notify.api_key",
            )?;

            let error = match AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    notify_api_key: Some("live-key".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            }) {
                Ok(_) => return Err("expected missing template failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("notify.templates")
                ),
                "validation failure should mention the missing template",
            )
        })();

        clear_vars(&["RESOURCING_NOTIFY_MODE"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RESOURCING_WORKER_MAX_ATTEMPTS", "many");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "RESOURCING_WORKER_MAX_ATTEMPTS",
                "invalid override key should be reported",
            ),
            other => Err(format!("expected invalid env override, got {other:?}")),
        };

        clear_vars(&["RESOURCING_WORKER_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn retry_delay_longer_than_a_week_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RESOURCING_WORKER_RETRY_DELAY_SECS", "99999999999999");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => ensure(
                message.contains("worker.retry_delay_secs"),
                "validation failure should name the retry delay",
            ),
            other => Err(format!("expected retry delay validation failure, got {other:?}")),
        };

        clear_vars(&["RESOURCING_WORKER_RETRY_DELAY_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RESOURCING_NOTIFY_API_KEY", "notify-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("notify-secret-value"),
                "debug output should not contain the notify api key",
            )
        })();

        clear_vars(&["RESOURCING_NOTIFY_API_KEY"]);
        result
    }
}
