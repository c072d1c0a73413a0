use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub recognition_service: RecognitionServiceConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub metrics_server: MetricsServerConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.credentials.validate()?;
        self.recognition_service.validate()?;
        self.recognition.validate()?;
        self.camera.validate()?;
        if self.collection.id.trim().is_empty() {
            return Err("Collection id must not be empty".to_string());
        }
        if self.identity.external_id.trim().is_empty() {
            return Err("Identity external_id must not be empty".to_string());
        }
        Ok(())
    }
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Deserialize, Clone, Default)]
pub struct CredentialsConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl CredentialsConfig {
    pub fn validate(&self) -> Result<(), String> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        if !present(&self.access_key_id) || !present(&self.secret_access_key) {
            return Err(
                "Credentials not found. Set FR_CREDENTIALS__ACCESS_KEY_ID and FR_CREDENTIALS__SECRET_ACCESS_KEY."
                    .to_string(),
            );
        }
        Ok(())
    }
}

// Never print the secret, even at debug level.
impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecognitionServiceConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_search_timeout_ms() -> u64 {
    5000
}

fn default_connect_retries() -> u32 {
    10
}

impl RecognitionServiceConfig {
    pub fn get_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_ms == 0 {
            return Err("recognition_service.connect_timeout_ms must be at least 1".to_string());
        }
        if self.search_timeout_ms == 0 {
            return Err("recognition_service.search_timeout_ms must be at least 1".to_string());
        }
        if self.connect_retries == 0 {
            return Err("recognition_service.connect_retries must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    pub id: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            id: "my-face-collection".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub external_id: String,
    pub reference_image: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecognitionConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Stop the loop after this many searches fail in a row. Unset means never.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

fn default_similarity_threshold() -> f32 {
    85.0
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_consecutive_failures: None,
        }
    }
}

impl RecognitionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.similarity_threshold) {
            return Err(format!(
                "Similarity threshold {} is outside the 0-100 range",
                self.similarity_threshold
            ));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err("max_consecutive_failures must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default = "default_quit_key")]
    pub quit_key: char,
}

fn default_window_title() -> String {
    "Face Recognition".to_string()
}

fn default_quit_key() -> char {
    'q'
}

impl CameraConfig {
    /// The window reports key codes as single bytes.
    pub fn validate(&self) -> Result<(), String> {
        if !self.quit_key.is_ascii() {
            return Err(format!(
                "Quit key {:?} must be a single ASCII character",
                self.quit_key
            ));
        }
        Ok(())
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            window_title: default_window_title(),
            quit_key: default_quit_key(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl MetricsServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("FR")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    config
        .validate()
        .map_err(|e| config::ConfigError::Message(format!("Invalid configuration: {}", e)))?;

    Ok(config)
}
