use std::path::PathBuf;

use tracing::warn;

use crate::{
    error::{Result, StemError},
    types::SeparationConfig,
};

/// Environment variable holding the key that signs flash cookies.
pub const SECRET_KEY_ENV: &str = "SECRET_KEY";

/// Development fallback. Anyone who knows it can forge flash cookies.
pub const INSECURE_DEFAULT_SECRET: &str = "your_secret_key_here";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretSource {
    Environment,
    InsecureDefault,
}

#[derive(Clone)]
pub struct SecretKey {
    value: String,
    source: SecretSource,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl SecretKey {
    /// Unset and empty values both fall back to [`INSECURE_DEFAULT_SECRET`].
    pub fn from_value(value: Option<String>) -> Self {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(value) => Self {
                value,
                source: SecretSource::Environment,
            },
            None => Self {
                value: INSECURE_DEFAULT_SECRET.to_string(),
                source: SecretSource::InsecureDefault,
            },
        }
    }

    pub fn from_env() -> Self {
        Self::from_value(std::env::var(SECRET_KEY_ENV).ok())
    }

    pub fn source(&self) -> &SecretSource {
        &self.source
    }

    pub fn is_insecure(&self) -> bool {
        self.source == SecretSource::InsecureDefault
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.value.as_bytes()
    }

    /// Hardened deployments refuse the fallback key; otherwise it is accepted with a warning.
    pub fn check(&self, hardened: bool) -> Result<()> {
        if !self.is_insecure() {
            return Ok(());
        }
        if hardened {
            return Err(StemError::Config(format!(
                "{SECRET_KEY_ENV} is not set; the built-in development key is refused in hardened mode"
            )));
        }
        warn!("{SECRET_KEY_ENV} is not set, flash cookies are signed with the insecure development key");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub addr: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub secret_key: SecretKey,
    pub separation: SeparationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".into(),
            input_dir: PathBuf::from("./input_audio"),
            output_dir: PathBuf::from("./output"),
            max_upload_bytes: 512 * 1024 * 1024,
            secret_key: SecretKey::from_value(None),
            separation: SeparationConfig::default(),
        }
    }
}
