//! Server configuration loading from file and environment variables.

use parley_agent::{AgentConfig, OpenAiConfig};
use parley_store::StoreSettings;
use parley_voice::{DeepgramConfig, TwilioConfig};
use serde::Deserialize;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where call-session records are written.
    #[serde(default)]
    pub session_store: StoreSettings,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub deepgram: DeepgramConfig,

    #[serde(default)]
    pub twilio: TwilioConfig,

    /// Greeting, prompt and turn limits.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Data served by the built-in tools.
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public hostname used in the stream URL when a request carries no
    /// host header.
    #[serde(default)]
    pub public_host: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub appointment_types: Vec<Value>,
    #[serde(default)]
    pub staff_members: Vec<Value>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Required settings are absent.
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
}

impl Config {
    /// Checks that every setting needed to take a call is present, reporting
    /// all missing keys at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if blank(&self.deepgram.api_key) {
            missing.push("DEEPGRAM_API_KEY");
        }
        if blank(&self.deepgram.voice_model) {
            missing.push("VOICE_MODEL");
        }
        if blank(&self.openai.api_key) {
            missing.push("OPENAI_API_KEY");
        }
        if self.twilio.recording_enabled {
            if blank(&self.twilio.account_sid) {
                missing.push("TWILIO_ACCOUNT_SID");
            }
            if blank(&self.twilio.auth_token) {
                missing.push("TWILIO_AUTH_TOKEN");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(
                missing.into_iter().map(String::from).collect(),
            ))
        }
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn flag(value: &str) -> bool {
    matches!(value.trim(), "true" | "1")
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with environment lookups going through `env`.
pub fn load_config_with<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Environment variable overrides:
/// - `PARLEY_HOST` / `PORT` / `SERVER` override `server.host` / `port` / `public_host`
/// - `PARLEY_LOG_LEVEL` / `PARLEY_LOG_JSON` override `logging`
/// - `SESSION_STORE_BACKEND`, `REDIS_URL`, `GOOGLE_CLOUD_PROJECT`,
///   `FIRESTORE_COLLECTION`, `FIRESTORE_DATABASE`, `GCP_ACCESS_TOKEN` override
///   `session_store`
/// - `OPENAI_API_KEY` / `OPENAI_MODEL` / `OPENAI_BASE_URL` override `openai`
/// - `DEEPGRAM_API_KEY` / `VOICE_MODEL` override `deepgram`
/// - `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` / `RECORDING_ENABLED` override `twilio`
/// - `ZOHO_APPOINTMENT_TYPES` / `ZOHO_STAFF_MEMBERS` (JSON arrays) override `tools`
fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = env("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = env("PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(public_host) = env("SERVER") {
        config.server.public_host = public_host;
    }
    if let Some(level) = env("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("PARLEY_LOG_JSON") {
        config.logging.json = flag(&json);
    }

    let store = &mut config.session_store;
    if let Some(backend) = env("SESSION_STORE_BACKEND") {
        store.backend = Some(backend);
    }
    if let Some(url) = env("REDIS_URL") {
        store.redis_url = Some(url);
    }
    if let Some(project) = env("GOOGLE_CLOUD_PROJECT") {
        store.project_id = Some(project);
    }
    if let Some(collection) = env("FIRESTORE_COLLECTION").filter(|v| !blank(v)) {
        store.collection = collection;
    }
    if let Some(database) = env("FIRESTORE_DATABASE").filter(|v| !blank(v)) {
        store.database = database;
    }
    if let Some(token) = env("GCP_ACCESS_TOKEN") {
        store.access_token = Some(token);
    }

    if let Some(key) = env("OPENAI_API_KEY") {
        config.openai.api_key = key;
    }
    if let Some(model) = env("OPENAI_MODEL").filter(|v| !blank(v)) {
        config.openai.model = model;
    }
    if let Some(base_url) = env("OPENAI_BASE_URL").filter(|v| !blank(v)) {
        config.openai.base_url = base_url;
    }

    if let Some(key) = env("DEEPGRAM_API_KEY") {
        config.deepgram.api_key = key;
    }
    if let Some(model) = env("VOICE_MODEL") {
        config.deepgram.voice_model = model;
    }

    if let Some(sid) = env("TWILIO_ACCOUNT_SID") {
        config.twilio.account_sid = sid;
    }
    if let Some(token) = env("TWILIO_AUTH_TOKEN") {
        config.twilio.auth_token = token;
    }
    if let Some(enabled) = env("RECORDING_ENABLED") {
        config.twilio.recording_enabled = flag(&enabled);
    }

    if let Some(items) = json_list(&env, "ZOHO_APPOINTMENT_TYPES") {
        config.tools.appointment_types = items;
    }
    if let Some(items) = json_list(&env, "ZOHO_STAFF_MEMBERS") {
        config.tools.staff_members = items;
    }
}

fn json_list<F>(env: &F, key: &str) -> Option<Vec<Value>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key).filter(|v| !blank(v))?;
    match serde_json::from_str::<Vec<Value>>(&raw) {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring malformed JSON list");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_config_with(Some("/nonexistent/parley.toml"), no_env).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.deepgram.voice_model, parley_voice::DEFAULT_VOICE_MODEL);
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert_eq!(config.session_store.ttl_seconds, 3600);
        assert_eq!(config.agent.max_tool_rounds, 5);
        assert!(config.session_store.backend.is_none());
    }

    #[test]
    fn file_values_are_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090
public_host = "calls.example.com"

[session_store]
backend = "memory"
ttl_seconds = 120

[agent]
greeting = "Hi there."

[tools]
appointment_types = ["Consultation", "Follow-up"]
"#
        )
        .unwrap();

        let config = load_config_with(file.path().to_str(), no_env).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.public_host, "calls.example.com");
        assert_eq!(config.session_store.backend.as_deref(), Some("memory"));
        assert_eq!(config.session_store.ttl_seconds, 120);
        assert_eq!(config.session_store.collection, "call_sessions");
        assert_eq!(config.agent.greeting, "Hi there.");
        assert_eq!(config.agent.max_tool_rounds, 5);
        assert_eq!(config.tools.appointment_types.len(), 2);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = load_config_with(file.path().to_str(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        let env = lookup(&[
            ("PORT", "7000"),
            ("SERVER", "abc.ngrok.io"),
            ("PARLEY_LOG_JSON", "1"),
            ("REDIS_URL", "redis://:pw@cache:6380"),
            ("GOOGLE_CLOUD_PROJECT", "proj"),
            ("OPENAI_API_KEY", "sk-test"),
            ("DEEPGRAM_API_KEY", "dg-test"),
            ("VOICE_MODEL", "aura-luna-en"),
            ("RECORDING_ENABLED", "true"),
            ("ZOHO_STAFF_MEMBERS", r#"[{"name":"Ada"}]"#),
            ("ZOHO_APPOINTMENT_TYPES", "not json"),
        ]);
        let config = load_config_with(None, env).unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.public_host, "abc.ngrok.io");
        assert!(config.logging.json);
        assert_eq!(
            config.session_store.redis_url.as_deref(),
            Some("redis://:pw@cache:6380")
        );
        assert_eq!(config.session_store.project_id.as_deref(), Some("proj"));
        assert_eq!(config.openai.api_key, "sk-test");
        assert_eq!(config.deepgram.api_key, "dg-test");
        assert_eq!(config.deepgram.voice_model, "aura-luna-en");
        assert!(config.twilio.recording_enabled);
        assert_eq!(config.tools.staff_members[0]["name"], "Ada");
        assert!(config.tools.appointment_types.is_empty());
    }

    #[test]
    fn unparseable_port_keeps_default() {
        let config = load_config_with(None, lookup(&[("PORT", "eighty")])).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn validate_reports_every_missing_key() {
        let config = load_config_with(None, lookup(&[("VOICE_MODEL", "")])).unwrap();
        match config.validate() {
            Err(ConfigError::Missing(keys)) => {
                assert_eq!(keys, vec!["DEEPGRAM_API_KEY", "VOICE_MODEL", "OPENAI_API_KEY"]);
            }
            other => panic!("expected missing keys, got {other:?}"),
        }
    }

    #[test]
    fn recording_requires_account_credentials() {
        let env = lookup(&[
            ("DEEPGRAM_API_KEY", "dg"),
            ("OPENAI_API_KEY", "sk"),
            ("RECORDING_ENABLED", "true"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
        ]);
        let config = load_config_with(None, env).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required configuration: TWILIO_AUTH_TOKEN"
        );

        let env = lookup(&[("DEEPGRAM_API_KEY", "dg"), ("OPENAI_API_KEY", "sk")]);
        assert!(load_config_with(None, env).unwrap().validate().is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let env = lookup(&[
            ("OPENAI_API_KEY", "sk-secret"),
            ("DEEPGRAM_API_KEY", "dg-secret"),
            ("TWILIO_AUTH_TOKEN", "tw-secret"),
            ("REDIS_URL", "redis://:hunter2@cache"),
        ]);
        let config = load_config_with(None, env).unwrap();
        let rendered = format!("{config:?}");
        for secret in ["sk-secret", "dg-secret", "tw-secret", "hunter2"] {
            assert!(!rendered.contains(secret), "{secret} leaked");
        }
    }
}
