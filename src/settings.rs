use crate::labels::ResolverOptions;
use crate::oci::reference::normalize_registry_host;
use crate::oci::ClientOptions;
use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use std::time::Duration;

const ENV_PREFIX: &str = "IMAGE_LABELER";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub credentials: CredentialsSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound for handling a single request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CredentialsSettings {
    /// Path of the mounted `.dockerconfigjson` document
    pub path: String,
}

impl Default for CredentialsSettings {
    fn default() -> Self {
        Self {
            path: ".dockerconfigjson".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegistrySettings {
    /// Registry used for references without a host
    pub default_registry: String,

    /// Namespace inserted before bare repository names on the default registry,
    /// e.g. `nginx` → `library/nginx`. Empty disables the rewrite.
    pub default_namespace: Option<String>,

    /// Hosts queried anonymously even without a credential entry
    pub anonymous_registries: Vec<String>,

    /// Hosts contacted over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Network timeout for a single registry call, in seconds
    pub timeout_secs: u64,

    pub max_config_size_bytes: u64,

    /// Retries after Unavailable/Timeout failures
    pub retry_attempts: u32,

    pub retry_backoff_ms: u64,

    /// Answer with no labels when a known registry fails
    pub fallback_to_empty: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_registry: "docker.io".to_string(),
            default_namespace: Some("library".to_string()),
            anonymous_registries: Vec::new(),
            insecure_registries: Vec::new(),
            timeout_secs: 10,
            max_config_size_bytes: 4 * 1024 * 1024,
            retry_attempts: 0,
            retry_backoff_ms: 200,
            fallback_to_empty: false,
        }
    }
}

impl RegistrySettings {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            insecure_registries: self
                .insecure_registries
                .iter()
                .map(|host| normalize_registry_host(host))
                .collect(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            default_registry: normalize_registry_host(&self.default_registry),
            default_namespace: self
                .default_namespace
                .clone()
                .filter(|namespace| !namespace.is_empty()),
            retry_attempts: self.retry_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            fallback_to_empty: self.fallback_to_empty,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    /// Lifetime of a resolved label set, in seconds
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_capacity: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WebhookSettings {
    /// Merge the pod's own `metadata.labels` into the response; image labels win
    pub merge_pod_labels: bool,
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => serde_json::Value::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::config_value_to_json(v)))
                    .collect(),
            ),
            ValueKind::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Self::config_value_to_json).collect())
            }
        }
    }

    /// Add `<config_dir>/<name>.{toml,yaml,yml}` if present.
    /// Returns whether a file was found.
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> bool {
        for ext in ["toml", "yaml", "yml"] {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return true;
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        false
    }

    /// Load settings using `IMAGE_LABELER_CONFIG_DIR` and `IMAGE_LABELER_RUN_MODE`
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("IMAGE_LABELER_RUN_MODE").unwrap_or_else(|_| "production".into());
        let config_dir = env::var("IMAGE_LABELER_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        Self::load(&config_dir, &run_mode)
    }

    /// Load settings from files in `config_dir` and `IMAGE_LABELER__*` variables.
    ///
    /// Files are layered `default`, `<run_mode>`, `local`; every file is optional.
    pub fn load(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        Self::try_add_config_file(&mut builder, config_dir, "default");
        Self::try_add_config_file(&mut builder, config_dir, run_mode);
        Self::try_add_config_file(&mut builder, config_dir, "local");

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("registry.anonymous_registries")
                    .with_list_parse_key("registry.insecure_registries"),
            )
            .build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let json_value = serde_json::Value::Object(
            root_value
                .iter()
                .map(|(k, v)| (k.clone(), Self::config_value_to_json(v)))
                .collect(),
        );

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "server.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.registry.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "registry.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.registry.max_config_size_bytes == 0 {
            return Err(ConfigError::Message(
                "registry.max_config_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.registry.default_registry.trim().is_empty() {
            return Err(ConfigError::Message(
                "registry.default_registry must not be empty".to_string(),
            ));
        }
        if self.credentials.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "credentials.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("IMAGE_LABELER_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${IMAGE_LABELER_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("IMAGE_LABELER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("IMAGE_LABELER_MISSING_VAR");
        let result =
            Settings::substitute_env_vars_in_string("${IMAGE_LABELER_MISSING_VAR:-default_value}");
        assert_eq!(result, "default_value");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("plain_value");
        assert_eq!(result, "plain_value");
    }

    #[test]
    fn test_defaults_without_config_files() {
        let temp_dir = TempDir::new().unwrap();

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "production").unwrap();

        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.request_timeout_secs, 15);
        assert_eq!(settings.credentials.path, ".dockerconfigjson");
        assert_eq!(settings.registry.default_registry, "docker.io");
        assert_eq!(settings.registry.default_namespace.as_deref(), Some("library"));
        assert_eq!(settings.registry.max_config_size_bytes, 4_194_304);
        assert_eq!(settings.cache.ttl(), Duration::from_secs(300));
        assert!(!settings.webhook.merge_pod_labels);
    }

    #[test]
    fn test_layered_files_and_unknown_fields() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.yaml"),
            r#"
server:
  port: 9000
  unknown_field: "should trigger warning"
registry:
  anonymous_registries: ["mirror.example.com"]
  retry_attempts: 2
cache:
  ttl_secs: 60
"#,
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("staging.toml"),
            r#"
[server]
port = 9100

[webhook]
merge_pod_labels = true
"#,
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "staging").unwrap();

        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.registry.anonymous_registries, vec!["mirror.example.com"]);
        assert_eq!(settings.registry.retry_attempts, 2);
        assert_eq!(settings.cache.ttl_secs, 60);
        assert!(settings.webhook.merge_pod_labels);
    }

    #[test]
    fn test_string_values_are_substituted() {
        let temp_dir = TempDir::new().unwrap();
        env::set_var("IMAGE_LABELER_TEST_CREDS", "/var/run/secrets/registry.json");
        fs::write(
            temp_dir.path().join("default.toml"),
            r#"
[credentials]
path = "${IMAGE_LABELER_TEST_CREDS}"

[registry]
default_registry = "${IMAGE_LABELER_TEST_UNSET_REGISTRY:-registry.internal:5000}"
"#,
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "production").unwrap();
        env::remove_var("IMAGE_LABELER_TEST_CREDS");

        assert_eq!(settings.credentials.path, "/var/run/secrets/registry.json");
        assert_eq!(settings.registry.default_registry, "registry.internal:5000");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            "[registry]\ntimeout_secs = 0\n",
        )
        .unwrap();

        let result = Settings::load(temp_dir.path().to_str().unwrap(), "production");

        assert!(result.is_err());
    }

    #[test]
    fn test_resolver_options_treat_empty_namespace_as_disabled() {
        let registry = RegistrySettings {
            default_namespace: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(registry.resolver_options().default_namespace, None);

        let defaults = RegistrySettings::default().resolver_options();
        assert_eq!(defaults.default_namespace.as_deref(), Some("library"));
        assert_eq!(defaults.retry_backoff, Duration::from_millis(200));
    }

    #[test]
    fn test_registry_hosts_are_normalized() {
        let registry = RegistrySettings {
            default_registry: "Registry-1.Docker.io".to_string(),
            insecure_registries: vec![
                "http://Registry.Local:5000/".to_string(),
                "localhost:5000".to_string(),
            ],
            ..Default::default()
        };

        assert_eq!(registry.resolver_options().default_registry, "docker.io");
        assert_eq!(
            registry.client_options().insecure_registries,
            vec!["registry.local:5000".to_string(), "localhost:5000".to_string()]
        );
    }
}
