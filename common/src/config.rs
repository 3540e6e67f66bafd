use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub plates: PlatesConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Capture device index as understood by the OpenCV backend.
    #[serde(default = "default_camera_index")]
    pub index: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_canny_low")]
    pub canny_low: f64,
    #[serde(default = "default_canny_high")]
    pub canny_high: f64,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    #[serde(default = "default_epsilon_ratio")]
    pub epsilon_ratio: f64,
    /// Bounding boxes must be strictly wider than this.
    #[serde(default = "default_min_width")]
    pub min_width: i32,
    /// Bounding boxes must be strictly narrower than this.
    #[serde(default = "default_max_width")]
    pub max_width: i32,
    #[serde(default = "default_min_height")]
    pub min_height: i32,
    #[serde(default = "default_max_height")]
    pub max_height: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Tesseract data directory. `None` lets Tesseract use TESSDATA_PREFIX.
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_page_seg_mode")]
    pub page_seg_mode: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatesConfig {
    /// Allowlist the known-plate set is seeded with on every start.
    #[serde(default = "default_known_plates")]
    pub known: Vec<String>,
    #[serde(default = "default_plate_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// How long the startup connectivity probe waits for broker metadata.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub sender: String,
    pub password: String,
    pub recipient: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: default_camera_index(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            epsilon_ratio: default_epsilon_ratio(),
            min_width: default_min_width(),
            max_width: default_max_width(),
            min_height: default_min_height(),
            max_height: default_max_height(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            language: default_language(),
            page_seg_mode: default_page_seg_mode(),
        }
    }
}

impl Default for PlatesConfig {
    fn default() -> Self {
        Self {
            known: default_known_plates(),
            format: default_plate_format(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        content.parse()
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_camera_index() -> i32 {
    0
}
fn default_canny_low() -> f64 {
    75.0
}
fn default_canny_high() -> f64 {
    180.0
}
fn default_epsilon_ratio() -> f64 {
    0.02
}
fn default_min_width() -> i32 {
    60
}
fn default_max_width() -> i32 {
    200
}
fn default_min_height() -> i32 {
    15
}
fn default_max_height() -> i32 {
    80
}
fn default_language() -> String {
    "eng".into()
}
fn default_page_seg_mode() -> u32 {
    7
}
fn default_known_plates() -> Vec<String> {
    [
        "WB 74 AH 6561",
        "XYZ987",
        "LMN456",
        "PQR789",
        "JKL321",
        "KA 19 EQ 0001",
        "GJ03ER0563",
        "GHI852",
        "TUV159",
        "MNO753",
        "QWE963",
        "TR 03 MF 4477",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_plate_format() -> String {
    r"^[A-Z]{2} \d{2} [A-Z]{2} \d{4}$".into()
}
fn default_topic() -> String {
    "number_plate".into()
}
fn default_client_id() -> String {
    "plate-watch".into()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_database_path() -> String {
    "number_plates.db".into()
}
fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_log_level() -> String {
    "info".into()
}
