//! Server and normalization configuration

use serde::{Deserialize, Serialize};

/// Fixed loudness normalization parameters.
///
/// These are not user-configurable; every batch is normalized to the same
/// EBU R128 broadcast target so outputs from different uploads match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationConfig {
    /// Target integrated loudness in LUFS
    pub integrated_lufs: f64,
    /// Loudness range target in LU
    pub loudness_range_lu: f64,
    /// True-peak ceiling in dBTP
    pub true_peak_dbtp: f64,
    /// Output bitrate in bps
    pub bitrate: usize,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// FFmpeg encoder name
    pub codec: &'static str,
    /// Measure each input first and normalize with a linear gain
    pub two_pass: bool,
}

impl NormalizationConfig {
    pub const STANDARD: NormalizationConfig = NormalizationConfig {
        integrated_lufs: -23.0,
        loudness_range_lu: 11.0,
        true_peak_dbtp: -1.5,
        bitrate: 320_000,
        sample_rate: 44_100,
        codec: "libmp3lame",
        two_pass: true,
    };

    /// The single-pass (dynamic) `loudnorm` filter description
    pub fn filter_spec(&self) -> String {
        format!(
            "loudnorm=I={}:LRA={}:TP={}",
            self.integrated_lufs, self.loudness_range_lu, self.true_peak_dbtp
        )
    }

    /// `loudnorm` in analysis mode, reporting its measurements as JSON
    pub fn measurement_spec(&self) -> String {
        format!("{}:print_format=json", self.filter_spec())
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Upload handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum request body size in megabytes
    pub max_request_size_mb: usize,

    /// File name offered for the archive download
    pub archive_name: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_request_size_mb: 512,
            archive_name: "equalized_mp3s.zip".to_string(),
        }
    }
}

impl UploadConfig {
    /// Get maximum request size in bytes
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_size_mb * 1024 * 1024
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Upload configuration
    pub upload: UploadConfig,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upload: UploadConfig::default(),
            cors_enabled: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.upload.archive_name, "equalized_mp3s.zip");
    }

    #[test]
    fn test_upload_max_bytes() {
        let upload = UploadConfig {
            max_request_size_mb: 16,
            ..Default::default()
        };
        assert_eq!(upload.max_request_bytes(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_server_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        let path = path.to_str().unwrap();

        let config = ServerConfig {
            port: 9100,
            ..Default::default()
        };
        config.to_file(path).unwrap();

        let loaded = ServerConfig::from_file(path).unwrap();
        assert_eq!(loaded.port, 9100);
        assert_eq!(loaded.upload.max_request_size_mb, 512);
    }

    #[test]
    fn test_standard_normalization_parameters() {
        let norm = NormalizationConfig::STANDARD;
        assert_eq!(norm.integrated_lufs, -23.0);
        assert_eq!(norm.loudness_range_lu, 11.0);
        assert_eq!(norm.true_peak_dbtp, -1.5);
        assert_eq!(norm.bitrate, 320_000);
        assert_eq!(norm.codec, "libmp3lame");
    }

    #[test]
    fn test_filter_spec() {
        assert_eq!(
            NormalizationConfig::STANDARD.filter_spec(),
            "loudnorm=I=-23:LRA=11:TP=-1.5"
        );
        assert_eq!(
            NormalizationConfig::STANDARD.measurement_spec(),
            "loudnorm=I=-23:LRA=11:TP=-1.5:print_format=json"
        );
        assert!(NormalizationConfig::STANDARD.two_pass);
    }
}
