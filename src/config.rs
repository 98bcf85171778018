//! Runtime configuration for the service.

use std::path::PathBuf;

use thiserror::Error;

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 12;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9090;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DB_PATH: &str = "./ampligate_db";
pub const DEFAULT_OUT_DIR: &str = "./ampligate_out";
pub const DEFAULT_BUCKET_REGION: &str = "eu-west-2";

/// Default scheme registry: the ARTIC network primer scheme manifest.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/artic-network/primer-schemes/master/schemes_manifest.json";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be between 1 and {MAX_WORKERS}, got {0}")]
    BadWorkerCount(usize),

    #[error("no sample database path provided")]
    NoDbPath,

    #[error("no scheme manifest URL provided")]
    NoManifestUrl,

    #[error("no output directory provided and no bucket configured")]
    NoSink,
}

/// Explicit service configuration, validated before the service starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the server binds (and clients dial).
    pub address: String,
    pub port: u16,
    pub num_workers: usize,
    pub db_path: PathBuf,
    pub manifest_url: String,
    /// S3 bucket receiving filtered read sets; when unset, output lands in
    /// `out_dir`.
    pub bucket_name: Option<String>,
    pub bucket_region: String,
    pub out_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            num_workers: DEFAULT_WORKERS,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            bucket_name: None,
            bucket_region: DEFAULT_BUCKET_REGION.to_string(),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 || self.num_workers > MAX_WORKERS {
            return Err(ConfigError::BadWorkerCount(self.num_workers));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::NoDbPath);
        }
        if self.manifest_url.is_empty() {
            return Err(ConfigError::NoManifestUrl);
        }
        if self.bucket_name.is_none() && self.out_dir.as_os_str().is_empty() {
            return Err(ConfigError::NoSink);
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
