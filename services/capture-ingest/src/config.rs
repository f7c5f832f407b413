use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the capture ingestion service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Plate-capture (ANPR) watcher
    pub plate: WatcherConfig,
    /// Axle-capture watcher
    pub axle: WatcherConfig,
    /// S3 / MinIO configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Vehicle dimension enrichment
    #[serde(default)]
    pub dimension: DimensionConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Site identifier stamped on every ledger row
    pub site_id: String,
}

/// One FTP drop directory and where its captures are staged
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Run this watcher
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bucket receiving this domain's artifacts
    pub bucket: String,
    /// Seconds between directory listings
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Remote directory receiving unparseable metadata files.
    /// When unset they are deleted instead.
    pub quarantine_dir: Option<String>,
    /// FTP control connection
    pub ftp: FtpConfig,
}

/// FTP control connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct FtpConfig {
    /// host:port
    pub address: String,
    pub username: String,
    pub password: String,
    /// Directory the appliance writes into
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Connect timeout in seconds
    #[serde(default = "default_ftp_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Read/write timeout for every control-connection operation
    #[serde(default = "default_ftp_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Reconnect attempts before an operation gives up (0 = unbounded)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Vehicle dimension enrichment for plate captures
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Minimum detector score for a box to be measured
    #[serde(default = "default_detector_threshold")]
    pub detector_threshold: f64,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Camera pose and reference measurement
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_focal_length_px")]
    pub focal_length_px: f64,
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    /// Defaults to image_width / 2
    pub principal_point_x: Option<f64>,
    /// Defaults to image_height / 2
    pub principal_point_y: Option<f64>,
    #[serde(default = "default_camera_height_m")]
    pub camera_height_m: f64,
    /// 0 = horizontal, 90 = looking straight down
    #[serde(default = "default_tilt_angle_deg")]
    pub tilt_angle_deg: f64,
    #[serde(default = "default_reference_pixel_length")]
    pub reference_pixel_length: u32,
    #[serde(default = "default_reference_real_length_m")]
    pub reference_real_length_m: f64,
    #[serde(default = "default_reference_distance_m")]
    pub reference_distance_m: f64,
    /// Scales the width measured from the box's pixel height
    #[serde(default = "default_width_correction")]
    pub width_correction: f64,
    /// Height estimated as this fraction of length
    #[serde(default = "default_height_to_length_ratio")]
    pub height_to_length_ratio: f64,
    /// Confidence of a single head-on measurement before detector score
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,
}

// Default value functions
fn default_service_name() -> String {
    "capture-ingest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_remote_dir() -> String {
    "/".to_string()
}

fn default_ftp_connect_timeout_secs() -> u64 {
    10
}

fn default_ftp_operation_timeout_secs() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_detector_threshold() -> f64 {
    0.5
}

fn default_focal_length_px() -> f64 {
    1000.0
}

fn default_image_width() -> u32 {
    1920
}

fn default_image_height() -> u32 {
    1080
}

fn default_camera_height_m() -> f64 {
    6.0
}

fn default_tilt_angle_deg() -> f64 {
    30.0
}

fn default_reference_pixel_length() -> u32 {
    200
}

fn default_reference_real_length_m() -> f64 {
    5.0
}

fn default_reference_distance_m() -> f64 {
    10.0
}

fn default_width_correction() -> f64 {
    0.68
}

fn default_height_to_length_ratio() -> f64 {
    0.4
}

fn default_base_confidence() -> f64 {
    0.7
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(config::Environment::with_prefix("CAPTURE"))
    }

    /// Environment values stay strings until deserialization, so numeric
    /// looking identifiers such as a site ID of `007` keep their zeros.
    fn load_with(environment: config::Environment) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "capture-ingest")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("plate.bucket", "anpr")?
            .set_default("axle.bucket", "axle")?
            // Add config file if present
            .add_source(config::File::with_name("config/capture").required(false))
            .add_source(config::File::with_name("/etc/capture/capture").required(false))
            // Override with environment variables
            // CAPTURE__PLATE__FTP__ADDRESS -> plate.ftp.address
            .add_source(environment.separator("__"))
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl FtpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl Default for DimensionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            detector_threshold: default_detector_threshold(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            focal_length_px: default_focal_length_px(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            principal_point_x: None,
            principal_point_y: None,
            camera_height_m: default_camera_height_m(),
            tilt_angle_deg: default_tilt_angle_deg(),
            reference_pixel_length: default_reference_pixel_length(),
            reference_real_length_m: default_reference_real_length_m(),
            reference_distance_m: default_reference_distance_m(),
            width_correction: default_width_correction(),
            height_to_length_ratio: default_height_to_length_ratio(),
            base_confidence: default_base_confidence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_poll_interval_secs(), 5);
        assert_eq!(default_width_correction(), 0.68);
        assert_eq!(default_height_to_length_ratio(), 0.4);
        assert_eq!(default_max_reconnect_attempts(), 5);
    }

    #[test]
    fn test_calibration_defaults_leave_principal_point_unset() {
        let calibration = CalibrationConfig::default();
        assert!(calibration.principal_point_x.is_none());
        assert_eq!(calibration.image_width, 1920);
        assert_eq!(calibration.reference_pixel_length, 200);
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("CAPTURE").source(Some(vars))
    }

    #[test]
    fn test_env_keeps_numeric_looking_strings() {
        let config = Config::load_with(environment(&[
            ("CAPTURE__SERVICE__SITE_ID", "007"),
            ("CAPTURE__PLATE__FTP__PASSWORD", "0123"),
            ("CAPTURE__SERVICE__METRICS_PORT", "9191"),
            ("CAPTURE__AXLE__POLL_INTERVAL_SECS", "15"),
            ("CAPTURE__DIMENSION__ENABLED", "true"),
        ]))
        .unwrap();

        assert_eq!(config.service.site_id, "007");
        assert_eq!(config.plate.ftp.password, "0123");
        assert_eq!(config.service.metrics_port, 9191);
        assert_eq!(config.axle.poll_interval(), Duration::from_secs(15));
        assert!(config.dimension.enabled);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let watcher: WatcherConfig = serde_json::from_value(serde_json::json!({
            "bucket": "anpr",
            "poll_interval_secs": 0,
            "ftp": { "address": "ftp:21", "username": "u", "password": "p" }
        }))
        .unwrap();

        assert!(watcher.enabled);
        assert_eq!(watcher.poll_interval(), Duration::from_secs(1));
        assert_eq!(watcher.ftp.remote_dir, "/");
        assert!(watcher.quarantine_dir.is_none());
    }
}
