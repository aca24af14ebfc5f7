//! Engine configuration.
//!
//! Values are layered: a JSON file (optional), then `TID_*` environment
//! variables, then whatever the caller sets explicitly (the CLI applies its
//! flags last). [`EngineConfig::validate`] runs before anything touches the
//! ledger; every problem it finds is a `ReconcileError::Configuration`.
//!
//! Durations are written as `30s`, `5m`, `1h`, `7d`, `250ms`, or combined
//! (`1h30m`). A bare number is seconds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::SignerKeyPair;
use crate::engine::{Reconciler, DEFAULT_FETCH_CONCURRENCY};
use crate::enumerate::EnumerationStrategy;
use crate::error::{ReconcileError, Result};
use crate::ledger::{LedgerClient, LedgerClientOptions, LedgerTransport, LocalLedger, RpcTransport};
use crate::storage::load_signer;
use crate::time::{Clock, SystemClock};

pub const ENV_LEDGER_URL: &str = "TID_LEDGER_URL";
pub const ENV_REGISTRY_ADDRESS: &str = "TID_REGISTRY_ADDRESS";
pub const ENV_KEYSTORE: &str = "TID_KEYSTORE";
pub const ENV_KEYSTORE_PASSPHRASE: &str = "TID_KEYSTORE_PASSPHRASE";
pub const ENV_SIGNING_KEY: &str = "TID_SIGNING_KEY";
pub const ENV_INTERVAL: &str = "TID_INTERVAL";
pub const ENV_CALL_TIMEOUT: &str = "TID_CALL_TIMEOUT";

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// `http(s)://` gateway, or `file://` path of a local ledger snapshot.
    pub ledger_url: Option<String>,
    pub registry_address: Option<String>,
    pub keystore: Option<PathBuf>,
    #[serde(skip_serializing)]
    pub keystore_passphrase: Option<String>,
    /// Hex-encoded 32-byte Ed25519 seed.
    #[serde(skip_serializing)]
    pub signing_key: Option<String>,
    #[serde(with = "duration_text")]
    pub interval: Duration,
    #[serde(with = "duration_text")]
    pub call_timeout: Duration,
    #[serde(with = "duration_text")]
    pub confirmation_timeout: Duration,
    #[serde(with = "duration_text")]
    pub receipt_poll_interval: Duration,
    pub fetch_concurrency: usize,
    pub replay_page_blocks: u64,
    pub strategy: EnumerationStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_url: None,
            registry_address: None,
            keystore: None,
            keystore_passphrase: None,
            signing_key: None,
            interval: Duration::from_secs(5 * 60),
            call_timeout: Duration::from_secs(15),
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            replay_page_blocks: 5000,
            strategy: EnumerationStrategy::Direct,
        }
    }
}

/// Where the signing key comes from.
pub enum SignerSource {
    Keystore {
        path: PathBuf,
        passphrase: Zeroizing<String>,
    },
    HexSeed(Zeroizing<String>),
}

impl SignerSource {
    pub fn load(&self) -> Result<SignerKeyPair> {
        match self {
            Self::Keystore { path, passphrase } => load_signer(path, passphrase),
            Self::HexSeed(seed) => SignerKeyPair::from_hex_seed(seed),
        }
    }
}

impl std::fmt::Debug for SignerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keystore { path, .. } => f
                .debug_struct("Keystore")
                .field("path", path)
                .finish_non_exhaustive(),
            Self::HexSeed(_) => f.write_str("HexSeed(..)"),
        }
    }
}

/// Parsed ledger endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Rpc(url::Url),
    LocalFile(PathBuf),
}

impl EngineConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ReconcileError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Load `path` if given, else start from defaults; then apply the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `TID_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay variables obtained through `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_LEDGER_URL) {
            self.ledger_url = Some(v);
        }
        if let Some(v) = get(ENV_REGISTRY_ADDRESS) {
            self.registry_address = Some(v);
        }
        if let Some(v) = get(ENV_KEYSTORE) {
            self.keystore = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_KEYSTORE_PASSPHRASE) {
            self.keystore_passphrase = Some(v);
        }
        if let Some(v) = get(ENV_SIGNING_KEY) {
            self.signing_key = Some(v);
        }
        if let Some(v) = get(ENV_INTERVAL) {
            self.interval = parse_duration(&v)
                .map_err(|e| ReconcileError::Configuration(format!("{ENV_INTERVAL}: {e}")))?;
        }
        if let Some(v) = get(ENV_CALL_TIMEOUT) {
            self.call_timeout = parse_duration(&v)
                .map_err(|e| ReconcileError::Configuration(format!("{ENV_CALL_TIMEOUT}: {e}")))?;
        }
        Ok(())
    }

    /// Check that the engine can be started with these values.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        self.registry()?;
        self.signer_source()?;

        for (name, value) in [
            ("interval", self.interval),
            ("call_timeout", self.call_timeout),
            ("confirmation_timeout", self.confirmation_timeout),
            ("receipt_poll_interval", self.receipt_poll_interval),
        ] {
            if value.is_zero() {
                return Err(ReconcileError::Configuration(format!("{name} must be > 0")));
            }
        }
        if self.fetch_concurrency == 0 {
            return Err(ReconcileError::Configuration(
                "fetch_concurrency must be > 0".into(),
            ));
        }
        if self.replay_page_blocks == 0 {
            return Err(ReconcileError::Configuration(
                "replay_page_blocks must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        let raw = self.ledger_url.as_deref().map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(ReconcileError::Configuration(format!(
                "ledger endpoint is not set (ledger_url or {ENV_LEDGER_URL})"
            )));
        }
        let url = url::Url::parse(raw)
            .map_err(|e| ReconcileError::Configuration(format!("invalid ledger url '{raw}': {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Endpoint::Rpc(url)),
            "file" => url
                .to_file_path()
                .map(Endpoint::LocalFile)
                .map_err(|_| ReconcileError::Configuration(format!("invalid file url '{raw}'"))),
            other => Err(ReconcileError::Configuration(format!(
                "unsupported ledger url scheme '{other}' (expected http, https or file)"
            ))),
        }
    }

    pub fn registry(&self) -> Result<&str> {
        match self.registry_address.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => Ok(r),
            _ => Err(ReconcileError::Configuration(format!(
                "registry address is not set (registry_address or {ENV_REGISTRY_ADDRESS})"
            ))),
        }
    }

    pub fn signer_source(&self) -> Result<SignerSource> {
        match (&self.signing_key, &self.keystore) {
            (Some(_), Some(_)) => Err(ReconcileError::Configuration(
                "both a signing key and a keystore are configured; choose one".into(),
            )),
            (Some(seed), None) => Ok(SignerSource::HexSeed(Zeroizing::new(seed.clone()))),
            (None, Some(path)) => {
                let passphrase = self.keystore_passphrase.clone().ok_or_else(|| {
                    ReconcileError::Configuration(format!(
                        "keystore {} needs a passphrase ({ENV_KEYSTORE_PASSPHRASE})",
                        path.display()
                    ))
                })?;
                Ok(SignerSource::Keystore {
                    path: path.clone(),
                    passphrase: Zeroizing::new(passphrase),
                })
            }
            (None, None) => Err(ReconcileError::Configuration(format!(
                "no signing key configured ({ENV_SIGNING_KEY} or {ENV_KEYSTORE})"
            ))),
        }
    }

    pub fn client_options(&self) -> Result<LedgerClientOptions> {
        let mut options = LedgerClientOptions::new(self.registry()?);
        options.call_timeout = self.call_timeout;
        options.confirmation_timeout = self.confirmation_timeout;
        options.receipt_poll_interval = self.receipt_poll_interval;
        options.replay_page_blocks = self.replay_page_blocks;
        Ok(options)
    }

    /// Build the transport selected by the endpoint URL.
    pub fn open_transport(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn LedgerTransport>> {
        let registry = self.registry()?;
        match self.endpoint()? {
            Endpoint::Rpc(url) => {
                let transport = RpcTransport::new(url, registry, self.call_timeout)?;
                log::debug!("using JSON-RPC ledger gateway at {}", transport.endpoint());
                Ok(Arc::new(transport))
            }
            Endpoint::LocalFile(path) => {
                log::debug!("using local ledger snapshot at {}", path.display());
                Ok(Arc::new(LocalLedger::open(&path, registry, clock)?))
            }
        }
    }

    /// Validate, load the signer, open the transport and start a client.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<LedgerClient> {
        self.validate()?;
        let signer = self.signer_source()?.load().map_err(|e| {
            ReconcileError::Configuration(format!("cannot load signing key: {e}"))
        })?;
        let transport = self.open_transport(Arc::new(SystemClock))?;
        let client = LedgerClient::new(transport, signer, self.client_options()?);
        log::info!(
            "connected to registry {} as {}",
            self.registry()?,
            client.signer_address()
        );
        Ok(client)
    }

    /// Wire a [`Reconciler`] using the process clock.
    pub fn reconciler(&self) -> Result<Reconciler> {
        let client = self.connect()?;
        Ok(Reconciler::new(client, self.strategy, Arc::new(SystemClock))
            .with_fetch_concurrency(self.fetch_concurrency))
    }
}

/// Parse `30s`, `5m`, `1h`, `7d`, `250ms`, `1h30m`, or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut unit = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if !ch.is_ascii_alphabetic() {
            return Err(ReconcileError::Configuration(format!("invalid duration '{s}'")));
        }
        unit.push(ch);
        if chars.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            continue;
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| ReconcileError::Configuration(format!("invalid duration '{s}'")))?;
        let too_large = || ReconcileError::Configuration(format!("duration '{s}' is too large"));
        let part = match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            "d" => Duration::from_secs(value.checked_mul(86_400).ok_or_else(too_large)?),
            other => {
                return Err(ReconcileError::Configuration(format!("unknown duration unit '{other}' in '{s}'")));
            }
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
        digits.clear();
        unit.clear();
    }

    if !digits.is_empty() {
        return Err(ReconcileError::Configuration(format!("duration '{s}' is missing a unit (ms/s/m/h/d)")));
    }
    if s.is_empty() {
        return Err(ReconcileError::Configuration("empty duration".into()));
    }
    Ok(total)
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() != 0 || d.is_zero() {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

mod duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
