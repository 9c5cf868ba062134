/*!
 * Configuration surface
 *
 * Every knob has a safe default. Sections deserialize from partial JSON
 * documents (missing fields fall back to defaults) and can be overlaid from
 * `DOCSEAL_*` environment variables.
 */

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{error_codes, CryptoError, CryptoResult};

/// Smallest RSA modulus the engine will generate.
pub const MIN_RSA_BITS: usize = 2048;

/// Upper bound for certificate validity and key age settings, in days.
pub const MAX_LIFETIME_DAYS: u32 = 36_500;

/// Upper bound for the replay, session and challenge windows: one week.
pub const MAX_CHANNEL_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Upper bound for tolerated sender clock skew.
pub const MAX_CLOCK_SKEW_SECS: i64 = 3_600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub crypto: CryptoConfig,
    pub key_store: KeyStoreConfig,
    pub certificates: CertificateConfig,
    pub rotation: RotationConfig,
    pub channel: ChannelConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Secret from which private-key passphrases are derived. Generated
    /// per process when absent.
    pub server_secret: Option<String>,
    pub rsa_bits: usize,
    pub keygen_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            server_secret: None,
            rsa_bits: 4096,
            keygen_timeout_ms: 60_000,
            operation_timeout_ms: 10_000,
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl CryptoConfig {
    pub fn keygen_timeout(&self) -> Duration {
        Duration::from_millis(self.keygen_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("server_secret", &self.server_secret.as_ref().map(|_| "[REDACTED]"))
            .field("rsa_bits", &self.rsa_bits)
            .field("keygen_timeout_ms", &self.keygen_timeout_ms)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub directory: PathBuf,
    /// 64 hex characters, or any passphrase to be stretched with Argon2id.
    pub master_key: Option<String>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            directory: default_key_dir(),
            master_key: None,
        }
    }
}

impl std::fmt::Debug for KeyStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStoreConfig")
            .field("directory", &self.directory)
            .field("master_key", &self.master_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub default_validity_days: u32,
    pub max_validity_days: u32,
    pub crl_refresh_interval_secs: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            default_validity_days: 365,
            max_validity_days: 3650,
            crl_refresh_interval_secs: 300,
        }
    }
}

impl CertificateConfig {
    pub fn crl_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.crl_refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub enabled: bool,
    pub rotation_frequency_days: u32,
    pub batch_size: usize,
    pub breach_forces_rotation: bool,
    pub schedule_interval_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_frequency_days: 90,
            batch_size: 50,
            breach_forces_rotation: true,
            schedule_interval_secs: 86_400,
        }
    }
}

impl RotationConfig {
    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    /// Age past which a key pair is due for rotation.
    pub fn rotation_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.rotation_frequency_days.min(MAX_LIFETIME_DAYS)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub session_key_expiry_minutes: i64,
    pub max_envelope_bytes: usize,
    pub strict_verification: bool,
    pub replay_window_minutes: i64,
    pub challenge_ttl_minutes: i64,
    pub max_clock_skew_secs: i64,
    pub sweep_interval_secs: u64,
    pub server_identity: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            session_key_expiry_minutes: 30,
            max_envelope_bytes: 1024 * 1024,
            strict_verification: true,
            replay_window_minutes: 10,
            challenge_ttl_minutes: 5,
            max_clock_skew_secs: 60,
            sweep_interval_secs: 60,
            server_identity: "docseal-server".to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn replay_window(&self) -> chrono::Duration {
        window_minutes(self.replay_window_minutes)
    }

    pub fn session_lifetime(&self) -> chrono::Duration {
        window_minutes(self.session_key_expiry_minutes)
    }

    pub fn challenge_ttl(&self) -> chrono::Duration {
        window_minutes(self.challenge_ttl_minutes)
    }

    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs.clamp(0, MAX_CLOCK_SKEW_SECS))
    }
}

fn window_minutes(minutes: i64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.clamp(0, MAX_CHANNEL_WINDOW_MINUTES))
}

/// Convenience function to get the default key directory
pub fn default_key_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".docseal");
    path.push("keys");
    path
}

impl CoreConfig {
    pub fn from_json_str(json: &str) -> CryptoResult<Self> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> CryptoResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Defaults overlaid with `DOCSEAL_*` environment variables.
    pub fn from_env() -> CryptoResult<Self> {
        let mut config = CoreConfig::default();

        if let Ok(value) = env::var("DOCSEAL_MASTER_KEY") {
            config.key_store.master_key = Some(value);
        }
        if let Ok(value) = env::var("DOCSEAL_SERVER_SECRET") {
            config.crypto.server_secret = Some(value);
        }
        if let Ok(value) = env::var("DOCSEAL_KEY_DIR") {
            config.key_store.directory = PathBuf::from(value);
        }
        if let Ok(value) = env::var("DOCSEAL_SERVER_IDENTITY") {
            config.channel.server_identity = value;
        }

        overlay(&mut config.crypto.rsa_bits, "DOCSEAL_RSA_BITS")?;
        overlay(&mut config.crypto.keygen_timeout_ms, "DOCSEAL_KEYGEN_TIMEOUT_MS")?;
        overlay(&mut config.crypto.operation_timeout_ms, "DOCSEAL_OPERATION_TIMEOUT_MS")?;
        overlay(&mut config.certificates.crl_refresh_interval_secs, "DOCSEAL_CRL_REFRESH_SECS")?;
        overlay(&mut config.certificates.default_validity_days, "DOCSEAL_CERT_VALIDITY_DAYS")?;
        overlay(&mut config.rotation.enabled, "DOCSEAL_ROTATION_ENABLED")?;
        overlay(&mut config.rotation.rotation_frequency_days, "DOCSEAL_ROTATION_FREQUENCY_DAYS")?;
        overlay(&mut config.rotation.batch_size, "DOCSEAL_ROTATION_BATCH_SIZE")?;
        overlay(&mut config.rotation.breach_forces_rotation, "DOCSEAL_BREACH_FORCES_ROTATION")?;
        overlay(&mut config.channel.session_key_expiry_minutes, "DOCSEAL_SESSION_KEY_EXPIRY_MINUTES")?;
        overlay(&mut config.channel.max_envelope_bytes, "DOCSEAL_MAX_ENVELOPE_BYTES")?;
        overlay(&mut config.channel.strict_verification, "DOCSEAL_STRICT_VERIFICATION")?;
        overlay(&mut config.channel.replay_window_minutes, "DOCSEAL_REPLAY_WINDOW_MINUTES")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.crypto.rsa_bits < MIN_RSA_BITS {
            return Err(invalid("crypto.rsa_bits", &format!("must be at least {}", MIN_RSA_BITS)));
        }
        if self.crypto.keygen_timeout_ms == 0 || self.crypto.operation_timeout_ms == 0 {
            return Err(invalid("crypto.timeouts", "must be positive"));
        }
        if self.certificates.max_validity_days > MAX_LIFETIME_DAYS {
            return Err(invalid(
                "certificates.max_validity_days",
                &format!("must be at most {}", MAX_LIFETIME_DAYS),
            ));
        }
        if self.certificates.default_validity_days == 0
            || self.certificates.default_validity_days > self.certificates.max_validity_days
        {
            return Err(invalid(
                "certificates.default_validity_days",
                "must be between 1 and max_validity_days",
            ));
        }
        if self.rotation.batch_size == 0 {
            return Err(invalid("rotation.batch_size", "must be positive"));
        }
        if self.rotation.rotation_frequency_days == 0 || self.rotation.rotation_frequency_days > MAX_LIFETIME_DAYS {
            return Err(invalid(
                "rotation.rotation_frequency_days",
                &format!("must be between 1 and {}", MAX_LIFETIME_DAYS),
            ));
        }
        for (parameter, minutes) in [
            ("channel.replay_window_minutes", self.channel.replay_window_minutes),
            ("channel.session_key_expiry_minutes", self.channel.session_key_expiry_minutes),
            ("channel.challenge_ttl_minutes", self.channel.challenge_ttl_minutes),
        ] {
            if minutes <= 0 || minutes > MAX_CHANNEL_WINDOW_MINUTES {
                return Err(invalid(
                    parameter,
                    &format!("must be between 1 and {}", MAX_CHANNEL_WINDOW_MINUTES),
                ));
            }
        }
        if !(0..=MAX_CLOCK_SKEW_SECS).contains(&self.channel.max_clock_skew_secs) {
            return Err(invalid(
                "channel.max_clock_skew_secs",
                &format!("must be between 0 and {}", MAX_CLOCK_SKEW_SECS),
            ));
        }
        if self.channel.max_envelope_bytes == 0 {
            return Err(invalid("channel.max_envelope_bytes", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, reason: &str) -> CryptoError {
    CryptoError::invalid_input(parameter, reason, error_codes::INVALID_PARAMETER)
}

fn overlay<T: std::str::FromStr>(target: &mut T, var: &str) -> CryptoResult<()> {
    if let Ok(raw) = env::var(var) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| invalid(var, &format!("cannot parse '{}'", raw)))?;
    }
    Ok(())
}
