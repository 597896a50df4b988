use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// Default chat gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=9&encoding=json";

/// `GUILDS | GUILD_VOICE_STATES`.
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 7);

/// Delay between IDENTIFY and the voice state update.
pub const DEFAULT_VOICE_STATE_DELAY_MS: u64 = 2_000;

pub const DEFAULT_SESSION_READY_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Constant bitrate for the Opus encoder, bits per second.
pub const DEFAULT_BITRATE: i32 = 64_000;

/// Environment variable that overrides [`CallConfig::token`].
pub const TOKEN_ENV: &str = "FINCHVOICE_TOKEN";

/// Everything needed to place one call.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub token: String,
    pub user_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub gateway_url: String,
    pub intents: u64,
    pub voice_state_delay_ms: u64,
    pub session_ready_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub max_connect_attempts: u32,
    pub bitrate: i32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            user_id: String::new(),
            guild_id: String::new(),
            channel_id: String::new(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            intents: DEFAULT_INTENTS,
            voice_state_delay_ms: DEFAULT_VOICE_STATE_DELAY_MS,
            session_ready_timeout_ms: DEFAULT_SESSION_READY_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

impl std::fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallConfig")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("gateway_url", &self.gateway_url)
            .field("intents", &self.intents)
            .field("voice_state_delay_ms", &self.voice_state_delay_ms)
            .field("session_ready_timeout_ms", &self.session_ready_timeout_ms)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .field("bitrate", &self.bitrate)
            .finish()
    }
}

impl CallConfig {
    /// Replace the token with `FINCHVOICE_TOKEN` when it is set and non-empty.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.token = token;
            }
        }
        self
    }

    /// Check that a call can be placed with this config.
    ///
    /// # Errors
    /// Returns [`SdkError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SdkError> {
        for (name, value) in [
            ("token", &self.token),
            ("user_id", &self.user_id),
            ("guild_id", &self.guild_id),
            ("channel_id", &self.channel_id),
            ("gateway_url", &self.gateway_url),
        ] {
            if value.trim().is_empty() {
                return Err(SdkError::Config(format!("`{}` must not be empty", name)));
            }
        }
        if self.max_connect_attempts == 0 {
            return Err(SdkError::Config("`max_connect_attempts` must be at least 1".to_string()));
        }
        // Opus accepts 6 kbit/s to 510 kbit/s.
        if !(6_000..=510_000).contains(&self.bitrate) {
            return Err(SdkError::Config(format!(
                "`bitrate` {} is outside 6000..=510000",
                self.bitrate
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn voice_state_delay(&self) -> Duration {
        Duration::from_millis(self.voice_state_delay_ms)
    }

    #[must_use]
    pub fn session_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.session_ready_timeout_ms)
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
