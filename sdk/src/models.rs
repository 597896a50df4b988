use crate::crypto::SecretKey;

/// Identifiers needed to open the voice gateway, assembled from the
/// VOICE_STATE_UPDATE and VOICE_SERVER_UPDATE dispatches.
#[derive(Clone, PartialEq, Eq)]
pub struct VoiceSessionParameters {
    pub session_id: String,
    pub voice_token: String,
    pub voice_endpoint: String,
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
}

impl std::fmt::Debug for VoiceSessionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSessionParameters")
            .field("session_id", &self.session_id)
            .field("voice_token", &"<redacted>")
            .field("voice_endpoint", &self.voice_endpoint)
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Media credentials produced by the voice gateway handshake.
///
/// There is no public constructor: a [`crate::transport::MediaTransport`]
/// can only be built after a handshake has completed.
#[derive(Debug, Clone)]
pub struct VoiceCredentials {
    ssrc: u32,
    secret_key: SecretKey,
    server_ip: String,
    server_port: u16,
}

impl VoiceCredentials {
    pub(crate) fn new(ssrc: u32, secret_key: SecretKey, server_ip: String, server_port: u16) -> Self {
        Self {
            ssrc,
            secret_key,
            server_ip,
            server_port,
        }
    }

    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    #[must_use]
    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let params = VoiceSessionParameters {
            session_id: "sess".to_string(),
            voice_token: "voice-token-value".to_string(),
            voice_endpoint: "voice.example".to_string(),
            guild_id: "1".to_string(),
            channel_id: "2".to_string(),
            user_id: "3".to_string(),
        };
        assert!(!format!("{:?}", params).contains("voice-token-value"));

        let credentials = VoiceCredentials::new(42, SecretKey::new([0xAB; 32]), "10.0.0.1".to_string(), 5000);
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("42"));
        assert!(!printed.contains("171"));
    }
}
