use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use resourcing_core::config::{
    AppConfig, LogFormat, NotifyMode, DEFAULT_CONFIG_FILE, NESTED_CONFIG_FILE,
};
use resourcing_core::domain::documents::DocumentKind;
use resourcing_core::notifications::NotificationScenario;
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// One rendered setting: dotted key, accepted env names, and display value.
struct Setting {
    key: String,
    env_keys: Vec<String>,
    value: String,
}

impl Setting {
    fn new(key: &str, env_key: &str, value: impl Into<String>) -> Self {
        Self { key: key.to_string(), env_keys: vec![env_key.to_string()], value: value.into() }
    }

    fn with_alias(mut self, env_key: &str) -> Self {
        self.env_keys.push(env_key.to_string());
        self
    }
}

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("config", error_class, message, exit_code);
        }
    };

    let file_path = config_path.map(Path::to_path_buf).or_else(detect_config_path);
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(&setting, file_doc.as_ref(), file_path.as_deref());
        lines.push(render_line(&setting.key, &setting.value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let mut settings = vec![
        Setting::new("database.url", "RESOURCING_DATABASE_URL", &config.database.url),
        Setting::new(
            "database.max_connections",
            "RESOURCING_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Setting::new(
            "database.timeout_secs",
            "RESOURCING_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        Setting::new(
            "server.bind_address",
            "RESOURCING_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Setting::new(
            "server.health_check_port",
            "RESOURCING_SERVER_HEALTH_CHECK_PORT",
            config.server.health_check_port.to_string(),
        ),
        Setting::new(
            "server.graceful_shutdown_secs",
            "RESOURCING_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Setting::new("site.base_url", "RESOURCING_SITE_BASE_URL", &config.site.base_url),
        Setting::new("notify.mode", "RESOURCING_NOTIFY_MODE", notify_mode_label(config.notify.mode)),
        Setting::new(
            "notify.api_key",
            "RESOURCING_NOTIFY_API_KEY",
            config
                .notify
                .api_key
                .as_ref()
                .map(|key| redact_api_key(key.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
        ),
        Setting::new("notify.base_url", "RESOURCING_NOTIFY_BASE_URL", &config.notify.base_url),
        Setting::new(
            "notify.timeout_secs",
            "RESOURCING_NOTIFY_TIMEOUT_SECS",
            config.notify.timeout_secs.to_string(),
        ),
    ];

    for scenario in NotificationScenario::ALL {
        let template = config.notify.templates.template_for(scenario);
        settings.push(Setting::new(
            &format!("notify.templates.{}", scenario.as_str()),
            &format!("RESOURCING_NOTIFY_TEMPLATE_{}", scenario.as_str().to_uppercase()),
            if template.is_empty() { "<unset>" } else { template },
        ));
    }

    settings.extend([
        Setting::new(
            "worker.poll_interval_ms",
            "RESOURCING_WORKER_POLL_INTERVAL_MS",
            config.worker.poll_interval_ms.to_string(),
        ),
        Setting::new(
            "worker.max_attempts",
            "RESOURCING_WORKER_MAX_ATTEMPTS",
            config.worker.max_attempts.to_string(),
        ),
        Setting::new(
            "worker.retry_delay_secs",
            "RESOURCING_WORKER_RETRY_DELAY_SECS",
            config.worker.retry_delay_secs.to_string(),
        ),
        Setting::new(
            "worker.batch_size",
            "RESOURCING_WORKER_BATCH_SIZE",
            config.worker.batch_size.to_string(),
        ),
        Setting::new(
            "documents.required_for_submission",
            "RESOURCING_DOCUMENTS_REQUIRED_FOR_SUBMISSION",
            document_list(&config.documents.required_for_submission),
        ),
        Setting::new(
            "documents.required_for_completion",
            "RESOURCING_DOCUMENTS_REQUIRED_FOR_COMPLETION",
            document_list(&config.documents.required_for_completion),
        ),
        Setting::new(
            "approval.order",
            "RESOURCING_APPROVAL_ORDER",
            config
                .approval
                .order
                .to_keys()
                .iter()
                .map(|tier| tier.join(","))
                .collect::<Vec<_>>()
                .join(";"),
        ),
        Setting::new("logging.level", "RESOURCING_LOGGING_LEVEL", &config.logging.level)
            .with_alias("RESOURCING_LOG_LEVEL"),
        Setting::new(
            "logging.format",
            "RESOURCING_LOGGING_FORMAT",
            log_format_label(config.logging.format),
        )
        .with_alias("RESOURCING_LOG_FORMAT"),
    ]);

    settings
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    setting: &Setting,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = setting.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, &setting.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn notify_mode_label(mode: NotifyMode) -> &'static str {
    match mode {
        NotifyMode::LogOnly => "log_only",
        NotifyMode::Live => "live",
    }
}

fn log_format_label(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    }
}

fn document_list(kinds: &[DocumentKind]) -> String {
    if kinds.is_empty() {
        return "<none>".to_string();
    }
    kinds.iter().map(|kind| kind.as_str()).collect::<Vec<_>>().join(",")
}

/// Keeps the key name, which Notify shows in its admin screens, and hides
/// the service id and secret.
fn redact_api_key(api_key: &str) -> String {
    const SUFFIX_LEN: usize = 36 * 2 + 2;

    let trimmed = api_key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.is_ascii() && trimmed.len() > SUFFIX_LEN {
        return format!("{}-***", &trimmed[..trimmed.len() - SUFFIX_LEN]);
    }
    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_api_key};

    #[test]
    fn api_key_redaction_keeps_only_the_key_name() {
        let key = "staging-26785a09-ab16-4eb0-8407-a37497a57506-3d844edf-8d35-48ac-975b-e847b4f122b0";
        assert_eq!(redact_api_key(key), "staging-***");
        assert_eq!(redact_api_key("short"), "<redacted>");
        assert_eq!(redact_api_key("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_the_config_file() {
        let doc: Value = "[notify.templates]\napproved = \"abc\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "notify.templates.approved"));
        assert!(!contains_path(&doc, "notify.templates.amended"));
        assert!(!contains_path(&doc, "worker.batch_size"));
    }
}
