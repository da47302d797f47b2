//! Environment-driven configuration.
//!
//! Every option is optional except the outbound dial target. Values are
//! validated once at startup; a malformed value is the only fatal error
//! class in the gateway.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::bridge::{BridgeConfig, DEFAULT_TIMEOUT as DEFAULT_BRIDGE_TIMEOUT};
use crate::egress::DEFAULT_MAX_QUEUE_PER_SESSION;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_MIN_FRAME_INTERVAL_MS: u64 = 400;
const MIN_BRIDGE_TIMEOUT_MS: u64 = 100;

/// E.164: leading `+`, 8–15 digits, no leading zero.
pub fn is_valid_e164(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{7,14}$").expect("static regex"))
        .is_match(value)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Dial target for every call (E.164).
    pub outbound_target_e164: String,
    /// Externally reachable base URL; required to be HTTPS when Twilio
    /// signature validation is on.
    pub public_base_url: Option<String>,
    pub asterisk_shared_secret: Option<String>,
    pub control_api_secret: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub pipeline_min_frame_interval_ms: u64,
    pub egress_max_queue_per_session: usize,
    pub deepl_api_key: Option<String>,
    pub stub_stt_text: Option<String>,
    pub openclaw_bridge: Option<BridgeConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup (tests inject maps here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: {raw:?}"))?,
            None => DEFAULT_PORT,
        };
        let host = get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let log_level = get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let outbound_target_e164 = match get("OUTBOUND_TARGET_E164") {
            Some(target) => target,
            None => match get("DESTINATION_PHONE_E164") {
                Some(legacy) => {
                    tracing::warn!(
                        "DESTINATION_PHONE_E164 is deprecated; set OUTBOUND_TARGET_E164"
                    );
                    legacy
                }
                None => bail!("OUTBOUND_TARGET_E164 is required"),
            },
        };
        if !is_valid_e164(&outbound_target_e164) {
            bail!("OUTBOUND_TARGET_E164 is not E.164: {outbound_target_e164:?}");
        }

        let twilio_auth_token = get("TWILIO_AUTH_TOKEN");
        let public_base_url = get("PUBLIC_BASE_URL");
        if let (Some(url), Some(_)) = (&public_base_url, &twilio_auth_token) {
            if !url.starts_with("https://") {
                bail!("PUBLIC_BASE_URL must be https when TWILIO_AUTH_TOKEN is set: {url:?}");
            }
        }

        let pipeline_min_frame_interval_ms = match get("PIPELINE_MIN_FRAME_INTERVAL_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("PIPELINE_MIN_FRAME_INTERVAL_MS is invalid: {raw:?}"))?,
            None => DEFAULT_MIN_FRAME_INTERVAL_MS,
        };

        let egress_max_queue_per_session = match get("EGRESS_MAX_QUEUE_PER_SESSION") {
            Some(raw) => {
                let parsed = raw
                    .parse::<usize>()
                    .with_context(|| format!("EGRESS_MAX_QUEUE_PER_SESSION is invalid: {raw:?}"))?;
                if parsed == 0 {
                    tracing::warn!("EGRESS_MAX_QUEUE_PER_SESSION=0 clamped to 1");
                }
                parsed.max(1)
            }
            None => DEFAULT_MAX_QUEUE_PER_SESSION,
        };

        let openclaw_bridge = match get("OPENCLAW_BRIDGE_URL") {
            Some(endpoint) => {
                let timeout_ms = match get("OPENCLAW_BRIDGE_TIMEOUT_MS") {
                    Some(raw) => {
                        let parsed = raw.parse::<u64>().with_context(|| {
                            format!("OPENCLAW_BRIDGE_TIMEOUT_MS is invalid: {raw:?}")
                        })?;
                        parsed.max(MIN_BRIDGE_TIMEOUT_MS)
                    }
                    None => DEFAULT_BRIDGE_TIMEOUT.as_millis() as u64,
                };
                Some(BridgeConfig {
                    endpoint,
                    api_key: get("OPENCLAW_BRIDGE_API_KEY"),
                    timeout: Duration::from_millis(timeout_ms),
                })
            }
            None => None,
        };

        Ok(Self {
            host,
            port,
            log_level,
            outbound_target_e164,
            public_base_url,
            asterisk_shared_secret: get("ASTERISK_SHARED_SECRET"),
            control_api_secret: get("CONTROL_API_SECRET"),
            twilio_auth_token,
            pipeline_min_frame_interval_ms,
            egress_max_queue_per_session,
            deepl_api_key: get("DEEPL_API_KEY"),
            stub_stt_text: get("STUB_STT_TEXT"),
            openclaw_bridge,
        })
    }

    #[cfg(test)]
    pub fn for_tests(outbound_target: &str) -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: 0,
            log_level: DEFAULT_LOG_LEVEL.into(),
            outbound_target_e164: outbound_target.into(),
            public_base_url: None,
            asterisk_shared_secret: None,
            control_api_secret: None,
            twilio_auth_token: None,
            pipeline_min_frame_interval_ms: 0,
            egress_max_queue_per_session: DEFAULT_MAX_QUEUE_PER_SESSION,
            deepl_api_key: None,
            stub_stt_text: None,
            openclaw_bridge: None,
        }
    }
}
