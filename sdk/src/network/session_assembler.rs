use finchvoice_protocol::{DispatchEvent, VoiceServer};
use tracing::debug;

use crate::models::VoiceSessionParameters;

/// Pairs the session half (VOICE_STATE_UPDATE) and the server half
/// (VOICE_SERVER_UPDATE) of a voice session, in either order, and yields
/// [`VoiceSessionParameters`] exactly once.
#[derive(Debug)]
pub struct SessionAssembler {
    user_id: String,
    guild_id: String,
    channel_id: String,
    session_id: Option<String>,
    server: Option<VoiceServer>,
    emitted: bool,
}

impl SessionAssembler {
    #[must_use]
    pub fn new(user_id: &str, guild_id: &str, channel_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            session_id: None,
            server: None,
            emitted: false,
        }
    }

    /// Feed one dispatch. Returns the parameters on the dispatch that
    /// completes the pair, `None` otherwise.
    pub fn on_dispatch(&mut self, event: &DispatchEvent) -> Option<VoiceSessionParameters> {
        match event {
            DispatchEvent::VoiceStateUpdate(state) => {
                if state.user_id != self.user_id {
                    return None;
                }
                if state.guild_id.as_ref().is_some_and(|g| *g != self.guild_id) {
                    debug!("[Gateway] Ignoring voice state for another guild");
                    return None;
                }
                self.session_id = Some(state.session_id.clone());
            }
            DispatchEvent::VoiceServerUpdate(server) => {
                if server.guild_id.as_ref().is_some_and(|g| *g != self.guild_id) {
                    debug!("[Gateway] Ignoring voice server for another guild");
                    return None;
                }
                self.server = Some(server.clone());
            }
            DispatchEvent::Other(_) => return None,
        }

        self.try_complete()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.emitted
    }

    fn try_complete(&mut self) -> Option<VoiceSessionParameters> {
        if self.emitted {
            return None;
        }
        let (Some(session_id), Some(server)) = (&self.session_id, &self.server) else {
            return None;
        };

        self.emitted = true;
        Some(VoiceSessionParameters {
            session_id: session_id.clone(),
            voice_token: server.token.clone(),
            voice_endpoint: server.endpoint.clone(),
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            user_id: self.user_id.clone(),
        })
    }
}
