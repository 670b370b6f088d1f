//! Config schema: listener, credentials, telemetry push, registration.

use serde::{Deserialize, Serialize};

use chargegate_protocol::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_TELEMETRY_INTERVAL_MS, DEFAULT_TELEMETRY_SAMPLES,
    SUBPROTOCOL,
};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargegateConfig {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub telemetry: TelemetryConfig,
    pub registration: RegistrationConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Sub-protocol advertised on the WebSocket upgrade.
    pub subprotocol: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 9000,
            subprotocol: SUBPROTOCOL.into(),
        }
    }
}

/// Credential store seeding. Tokens are fixed once the gateway starts.
///
/// No fixed token ships by default: out of the box only the generated
/// tokens logged at startup are accepted. A well-known token such as
/// `TOKEN123` has to be listed in `tokens` or in `CHARGEGATE_TOKENS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Tokens accepted in the `token` query parameter.
    pub tokens: Vec<String>,
    /// Number of random tokens to generate (and log) at startup.
    pub generate: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            generate: 2,
        }
    }
}

/// Periodic push of telemetry lines to every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Pushed in order, wrapping around.
    pub samples: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
            samples: DEFAULT_TELEMETRY_SAMPLES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Values returned to stations in BootNotification results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub heartbeat_interval_secs: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl ChargegateConfig {
    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telemetry.enabled {
            if self.telemetry.interval_ms == 0 {
                anyhow::bail!("telemetry.interval_ms must be > 0");
            }
            if self.telemetry.samples.is_empty() {
                anyhow::bail!("telemetry.samples must not be empty when telemetry is enabled");
            }
        }
        if self.gateway.subprotocol.trim().is_empty() {
            anyhow::bail!("gateway.subprotocol must not be empty");
        }
        if self.auth.tokens.iter().any(|t| t.is_empty()) {
            anyhow::bail!("auth.tokens must not contain empty tokens");
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_gateway() {
        let cfg = ChargegateConfig::default();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.subprotocol, "ocpp2.0.1");
        assert_eq!(cfg.telemetry.interval_ms, 2000);
        assert_eq!(cfg.telemetry.samples.len(), 3);
        assert_eq!(cfg.registration.heartbeat_interval_secs, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_auth_only_generates_tokens() {
        let auth = AuthConfig::default();
        assert!(auth.tokens.is_empty());
        assert_eq!(auth.generate, 2);
        assert!(ChargegateConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: ChargegateConfig = toml::from_str(
            r#"
            [auth]
            tokens = ["TOKEN123"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.auth.tokens, vec!["TOKEN123".to_string()]);
        assert_eq!(cfg.auth.generate, 2);
        assert_eq!(cfg.gateway, GatewayConfig::default());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut cfg = ChargegateConfig::default();
        cfg.telemetry.interval_ms = 0;
        assert!(cfg.validate().is_err());
        cfg.telemetry.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_token() {
        let mut cfg = ChargegateConfig::default();
        cfg.auth.tokens.push(String::new());
        assert!(cfg.validate().is_err());
    }
}
