//! Settings resolver.
//!
//! Settings come from three places: built-in defaults, a JSON settings file
//! and the provider environment variables. The resolver only reads the
//! environment; it never writes process state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use unipath_common::{Error, Result, Scheme, Secret};

/// Default chunk size for stream copies.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Credentials and endpoint for one remote scheme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// Service endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Signing region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Access key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Secret access key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<Secret>,
    /// Temporary session token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<Secret>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    #[serde(default)]
    pub path_style: bool,
    /// Provider-specific options.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl CredentialBundle {
    /// Whether both halves of a key pair are present.
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.as_deref().is_some_and(|k| !k.is_empty())
            && self.secret_access_key.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Look up a provider option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|v| v.as_str())
    }
}

/// Partial update of a [`CredentialBundle`]; unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleUpdate {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<Secret>,
    pub session_token: Option<Secret>,
    pub path_style: Option<bool>,
    pub options: BTreeMap<String, String>,
}

impl BundleUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the signing region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the access key id.
    pub fn access_key_id(mut self, key: impl Into<String>) -> Self {
        self.access_key_id = Some(key.into());
        self
    }

    /// Set the secret access key.
    pub fn secret_access_key(mut self, secret: impl Into<String>) -> Self {
        self.secret_access_key = Some(Secret::new(secret));
        self
    }

    /// Set a temporary session token.
    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(Secret::new(token));
        self
    }

    /// Switch path-style bucket addressing on or off.
    pub fn path_style(mut self, path_style: bool) -> Self {
        self.path_style = Some(path_style);
        self
    }

    /// Add or overwrite one provider option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce a new bundle with this update applied on top of `base`.
    pub fn apply(&self, base: &CredentialBundle) -> CredentialBundle {
        let mut next = base.clone();
        if let Some(endpoint) = &self.endpoint {
            next.endpoint = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            next.region = Some(region.clone());
        }
        if let Some(key) = &self.access_key_id {
            next.access_key_id = Some(key.clone());
        }
        if let Some(secret) = &self.secret_access_key {
            next.secret_access_key = Some(secret.clone());
        }
        if let Some(token) = &self.session_token {
            next.session_token = Some(token.clone());
        }
        if let Some(path_style) = self.path_style {
            next.path_style = path_style;
        }
        next.options
            .extend(self.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        next
    }
}

/// Worker pool sizing for the sync/async bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Pool size. Defaults to half the CPUs, at least 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<usize>,
    /// Maximum queued calls before submissions are rejected. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
}

impl WorkerSettings {
    /// Effective pool size.
    pub fn resolved_workers(&self) -> usize {
        self.num_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| (num_cpus::get() / 2).max(2))
    }
}

/// Resolved library settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    #[serde(default)]
    pub bundles: BTreeMap<Scheme, CredentialBundle>,
}

fn default_read_chunk_size() -> usize {
    DEFAULT_READ_CHUNK_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: WorkerSettings::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            bundles: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        settings.workers.num_workers = parse_number(&lookup, "UNIPATH_NUM_WORKERS")?;
        settings.workers.queue_depth = parse_number(&lookup, "UNIPATH_QUEUE_DEPTH")?;
        if let Some(size) = parse_number(&lookup, "UNIPATH_READ_CHUNK_SIZE")? {
            if size == 0 {
                return Err(Error::Config("UNIPATH_READ_CHUNK_SIZE must be positive".into()));
            }
            settings.read_chunk_size = size;
        }

        for scheme in Scheme::S3_FAMILY {
            settings.bundles.insert(scheme, bundle_from_env(scheme, &lookup)?);
        }
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::from_io(e, path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path` when given, the default file when it exists, else the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_json_file(path);
        }
        match Self::default_file() {
            Some(path) if path.is_file() => Self::from_json_file(&path),
            _ => Self::from_env(),
        }
    }

    /// Default settings file location.
    pub fn default_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("unipath").join("settings.json"))
    }

    /// Bundle for `scheme`, or an empty bundle.
    pub fn bundle(&self, scheme: Scheme) -> CredentialBundle {
        self.bundles.get(&scheme).cloned().unwrap_or_default()
    }

    /// Replace the bundle for `scheme`.
    pub fn set_bundle(&mut self, scheme: Scheme, bundle: CredentialBundle) {
        self.bundles.insert(scheme, bundle);
    }
}

fn parse_number<F>(lookup: &F, name: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", name, raw)))
        })
        .transpose()
}

/// Prefix a bare host with a URL scheme and trim trailing slashes.
pub fn normalize_endpoint(raw: &str, secure: bool) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if secure {
        format!("https://{}", trimmed)
    } else {
        format!("http://{}", trimmed)
    }
}

struct EnvNames {
    endpoint: Option<&'static str>,
    access_key: &'static str,
    secret_key: &'static str,
    token: &'static str,
    region: &'static str,
    config: &'static str,
}

fn env_names(scheme: Scheme) -> Option<EnvNames> {
    let names = match scheme {
        Scheme::S3 => EnvNames {
            endpoint: Some("AWS_ENDPOINT_URL"),
            access_key: "AWS_ACCESS_KEY_ID",
            secret_key: "AWS_SECRET_ACCESS_KEY",
            token: "AWS_ACCESS_TOKEN",
            region: "AWS_REGION",
            config: "S3_CONFIG",
        },
        Scheme::S3Compat => EnvNames {
            endpoint: Some("S3_COMPAT_ENDPOINT"),
            access_key: "S3_COMPAT_ACCESS_KEY",
            secret_key: "S3_COMPAT_SECRET_KEY",
            token: "S3_COMPAT_ACCESS_TOKEN",
            region: "S3_COMPAT_REGION",
            config: "S3_COMPAT_CONFIG",
        },
        Scheme::Minio => EnvNames {
            endpoint: Some("MINIO_ENDPOINT"),
            access_key: "MINIO_ACCESS_KEY",
            secret_key: "MINIO_SECRET_KEY",
            token: "MINIO_ACCESS_TOKEN",
            region: "MINIO_REGION",
            config: "MINIO_CONFIG",
        },
        Scheme::R2 => EnvNames {
            endpoint: Some("R2_ENDPOINT"),
            access_key: "R2_ACCESS_KEY_ID",
            secret_key: "R2_SECRET_ACCESS_KEY",
            token: "R2_ACCESS_TOKEN",
            region: "R2_REGION",
            config: "R2_CONFIG",
        },
        Scheme::Wasabi => EnvNames {
            endpoint: Some("WASABI_ENDPOINT"),
            access_key: "WASABI_ACCESS_KEY_ID",
            secret_key: "WASABI_SECRET_ACCESS_KEY",
            token: "WASABI_ACCESS_TOKEN",
            region: "WASABI_REGION",
            config: "WASABI_CONFIG",
        },
        Scheme::Local | Scheme::Memory => return None,
    };
    Some(names)
}

fn bundle_from_env<F>(scheme: Scheme, lookup: &F) -> Result<CredentialBundle>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(names) = env_names(scheme) else {
        return Ok(CredentialBundle::default());
    };

    let mut bundle = CredentialBundle {
        access_key_id: lookup(names.access_key),
        secret_access_key: lookup(names.secret_key).map(Secret::new),
        session_token: lookup(names.token).map(Secret::new),
        region: lookup(names.region),
        endpoint: names.endpoint.and_then(|name| lookup(name)),
        ..CredentialBundle::default()
    };

    match scheme {
        Scheme::S3 => {
            let region = bundle.region.get_or_insert_with(|| "us-east-1".to_string()).clone();
            if bundle.endpoint.is_none() {
                bundle.endpoint = Some(format!("https://s3.{}.amazonaws.com", region));
            }
        }
        Scheme::S3Compat => {
            bundle.path_style = true;
        }
        Scheme::Minio => {
            bundle.path_style = true;
            let secure = lookup("MINIO_SECURE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false);
            bundle.endpoint = bundle.endpoint.map(|e| normalize_endpoint(&e, secure));
        }
        Scheme::R2 => {
            bundle.region = Some("auto".to_string());
            bundle.endpoint = match (bundle.endpoint.take(), lookup("R2_ACCOUNT_ID")) {
                (Some(endpoint), _) => Some(normalize_endpoint(&endpoint, true)),
                (None, Some(account)) => {
                    Some(format!("https://{}.r2.cloudflarestorage.com", account))
                }
                (None, None) => None,
            };
        }
        Scheme::Wasabi => {
            let region = bundle.region.get_or_insert_with(|| "us-east-1".to_string()).clone();
            bundle.endpoint = Some(match bundle.endpoint.take() {
                Some(endpoint) => normalize_endpoint(&endpoint, true),
                None if region == "us-east-1" => "https://s3.wasabisys.com".to_string(),
                None => format!("https://s3.{}.wasabisys.com", region),
            });
        }
        Scheme::Local | Scheme::Memory => {}
    }

    if let Some(raw) = lookup(names.config) {
        let extra: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{} is not a JSON object: {}", names.config, e)))?;
        for (key, value) in extra {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            bundle.options.insert(key, value);
        }
    }

    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = resolve(&[]).unwrap();
        assert_eq!(settings.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert!(settings.workers.resolved_workers() >= 2);

        let s3 = settings.bundle(Scheme::S3);
        assert_eq!(s3.region.as_deref(), Some("us-east-1"));
        assert_eq!(s3.endpoint.as_deref(), Some("https://s3.us-east-1.amazonaws.com"));
        assert!(!s3.has_credentials());

        let wasabi = settings.bundle(Scheme::Wasabi);
        assert_eq!(wasabi.endpoint.as_deref(), Some("https://s3.wasabisys.com"));
    }

    #[test]
    fn test_aws_variables() {
        let settings = resolve(&[
            ("AWS_ACCESS_KEY_ID", "AKIA"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_REGION", "eu-west-1"),
        ])
        .unwrap();
        let s3 = settings.bundle(Scheme::S3);
        assert!(s3.has_credentials());
        assert_eq!(s3.endpoint.as_deref(), Some("https://s3.eu-west-1.amazonaws.com"));
    }

    #[test]
    fn test_r2_endpoint_derivation() {
        let derived = resolve(&[("R2_ACCOUNT_ID", "abc123")]).unwrap();
        assert_eq!(
            derived.bundle(Scheme::R2).endpoint.as_deref(),
            Some("https://abc123.r2.cloudflarestorage.com")
        );
        assert_eq!(derived.bundle(Scheme::R2).region.as_deref(), Some("auto"));

        let explicit = resolve(&[("R2_ENDPOINT", "custom.example.com/")]).unwrap();
        assert_eq!(
            explicit.bundle(Scheme::R2).endpoint.as_deref(),
            Some("https://custom.example.com")
        );
    }

    #[test]
    fn test_wasabi_regional_endpoint() {
        let settings = resolve(&[("WASABI_REGION", "eu-central-1")]).unwrap();
        assert_eq!(
            settings.bundle(Scheme::Wasabi).endpoint.as_deref(),
            Some("https://s3.eu-central-1.wasabisys.com")
        );
    }

    #[test]
    fn test_minio_insecure_prefix_and_path_style() {
        let settings = resolve(&[("MINIO_ENDPOINT", "localhost:9000")]).unwrap();
        let minio = settings.bundle(Scheme::Minio);
        assert_eq!(minio.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(minio.path_style);
    }

    #[test]
    fn test_config_json_merged_into_options() {
        let settings = resolve(&[("S3_COMPAT_CONFIG", r#"{"max_concurrency": 8, "acl": "private"}"#)]).unwrap();
        let bundle = settings.bundle(Scheme::S3Compat);
        assert_eq!(bundle.option("max_concurrency"), Some("8"));
        assert_eq!(bundle.option("acl"), Some("private"));

        assert!(matches!(resolve(&[("MINIO_CONFIG", "[1, 2]")]), Err(Error::Config(_))));
    }

    #[test]
    fn test_worker_variables() {
        let settings = resolve(&[("UNIPATH_NUM_WORKERS", "6"), ("UNIPATH_QUEUE_DEPTH", "32")]).unwrap();
        assert_eq!(settings.workers.resolved_workers(), 6);
        assert_eq!(settings.workers.queue_depth, Some(32));
        assert!(matches!(resolve(&[("UNIPATH_NUM_WORKERS", "many")]), Err(Error::Config(_))));
    }

    #[test]
    fn test_bundle_update_applies_without_mutating() {
        let base = CredentialBundle {
            region: Some("us-east-1".into()),
            ..CredentialBundle::default()
        };
        let update = BundleUpdate::new().endpoint("http://localhost:9000").path_style(true);
        let next = update.apply(&base);

        assert_eq!(base.endpoint, None);
        assert_eq!(next.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(next.region.as_deref(), Some("us-east-1"));
        assert!(next.path_style);
        assert!(BundleUpdate::new().is_empty());
        assert_eq!(BundleUpdate::new().apply(&next), next);
    }

    #[test]
    fn test_json_file_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        let settings = resolve(&[("AWS_SECRET_ACCESS_KEY", "s"), ("AWS_ACCESS_KEY_ID", "k")]).unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();

        let loaded = Settings::from_json_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = resolve(&[("AWS_SECRET_ACCESS_KEY", "topsecret")]).unwrap();
        assert!(!format!("{:?}", settings).contains("topsecret"));
    }
}
