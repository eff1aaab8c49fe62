//! Process factory configuration (spec.md §6).

use std::env;
use std::path::PathBuf;

use reqwest::Url;
use thiserror::Error;

/// A Noise static keypair identifying this device to peers.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: [u8; 32],
    pub secret_key: [u8; 32],
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &crate::zbase32::encode(&self.public_key))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    /// Validate that both halves are exactly 32 bytes, per spec.md §6.
    pub fn from_bytes(public_key: Vec<u8>, secret_key: Vec<u8>) -> Result<Self, ConfigError> {
        let public_key: [u8; 32] = public_key
            .try_into()
            .map_err(|_| ConfigError::InvalidKeyLength("publicKey"))?;
        let secret_key: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| ConfigError::InvalidKeyLength("secretKey"))?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }

    /// Generate a fresh random keypair (Noise static DH keypair over X25519).
    pub fn generate() -> Self {
        let builder = snow::Builder::new(crate::transport::NOISE_PATTERN.parse().unwrap());
        let keypair = builder.generate_keypair().expect("keypair generation");
        let public_key: [u8; 32] = keypair
            .public
            .try_into()
            .expect("x25519 public key is 32 bytes");
        let secret_key: [u8; 32] = keypair
            .private
            .try_into()
            .expect("x25519 private key is 32 bytes");
        Self {
            public_key,
            secret_key,
        }
    }
}

/// Recognized process-factory configuration options (spec.md §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub default_online_style_url: Option<Url>,
    pub custom_map_path: PathBuf,
    pub fallback_map_path: PathBuf,
    pub key_pair: KeyPair,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be exactly 32 bytes")]
    InvalidKeyLength(&'static str),
    #[error("defaultOnlineStyleUrl is not a valid absolute URL: {0}")]
    InvalidStyleUrl(#[from] url::ParseError),
    #[error("fallbackMapPath does not exist: {0}")]
    FallbackMapMissing(PathBuf),
    #[error("fallbackMapPath is not a valid package: {0}")]
    FallbackMapInvalid(PathBuf),
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate the fallback package is present and openable as a zip
    /// package. Called once at startup; the `custom` slot need not exist yet.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fallback_map_path.exists() {
            return Err(ConfigError::FallbackMapMissing(self.fallback_map_path.clone()));
        }
        let file = std::fs::File::open(&self.fallback_map_path)
            .map_err(|_| ConfigError::FallbackMapInvalid(self.fallback_map_path.clone()))?;
        zip::ZipArchive::new(file)
            .map_err(|_| ConfigError::FallbackMapInvalid(self.fallback_map_path.clone()))?;
        Ok(())
    }

    /// Build configuration from environment variables, mirroring common
    /// conventions for local/manual runs of the embedded daemon
    /// (`CUSTOM_MAP_PATH`, `FALLBACK_MAP_PATH`, `DEFAULT_ONLINE_STYLE_URL`).
    /// A fresh keypair is generated if none is persisted by the host.
    pub fn from_env() -> Result<Self, ConfigError> {
        let custom_map_path =
            PathBuf::from(env::var("CUSTOM_MAP_PATH").unwrap_or_else(|_| "custom.smp".into()));
        let fallback_map_path = PathBuf::from(
            env::var("FALLBACK_MAP_PATH").unwrap_or_else(|_| "fallback.smp".into()),
        );
        let default_online_style_url = env::var("DEFAULT_ONLINE_STYLE_URL")
            .ok()
            .map(|s| Url::parse(&s))
            .transpose()?;

        Ok(Self {
            default_online_style_url,
            custom_map_path,
            fallback_map_path,
            key_pair: KeyPair::generate(),
        })
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    default_online_style_url: Option<String>,
    custom_map_path: Option<PathBuf>,
    fallback_map_path: Option<PathBuf>,
    key_pair: Option<KeyPair>,
}

impl ConfigBuilder {
    pub fn default_online_style_url(mut self, url: impl Into<String>) -> Self {
        self.default_online_style_url = Some(url.into());
        self
    }

    pub fn custom_map_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_map_path = Some(path.into());
        self
    }

    pub fn fallback_map_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_map_path = Some(path.into());
        self
    }

    pub fn key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let default_online_style_url = self
            .default_online_style_url
            .map(|s| Url::parse(&s))
            .transpose()?;
        let config = Config {
            default_online_style_url,
            custom_map_path: self.custom_map_path.unwrap_or_else(|| "custom.smp".into()),
            fallback_map_path: self
                .fallback_map_path
                .unwrap_or_else(|| "fallback.smp".into()),
            key_pair: self.key_pair.unwrap_or_else(KeyPair::generate),
        };
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_rejects_wrong_length() {
        let err = KeyPair::from_bytes(vec![0u8; 31], vec![0u8; 32]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKeyLength("publicKey")));
    }

    #[test]
    fn keypair_accepts_32_bytes() {
        let kp = KeyPair::from_bytes(vec![1u8; 32], vec![2u8; 32]).unwrap();
        assert_eq!(kp.public_key, [1u8; 32]);
    }

    #[test]
    fn builder_rejects_bad_url() {
        let err = Config::builder()
            .default_online_style_url("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStyleUrl(_)));
    }
}
