use crate::error::ProtocolError;

macro_rules! opcodes {
    ($(#[$meta:meta])* $enum:ident { $($name:ident = $val:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $enum { $($name = $val,)* }

        impl $enum {
            #[must_use]
            pub const fn as_u8(self) -> u8 { self as u8 }
        }

        impl TryFrom<u8> for $enum {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($val => Ok(Self::$name),)*
                    _ => Err(ProtocolError::UnknownOpcode(value)),
                }
            }
        }
    };
}

opcodes! {
    /// Chat gateway opcodes used by the voice client.
    GatewayOpcode {
        Dispatch = 0,
        Heartbeat = 1,
        Identify = 2,
        VoiceStateUpdate = 4,
        Reconnect = 7,
        InvalidSession = 9,
        Hello = 10,
        HeartbeatAck = 11,
    }
}

opcodes! {
    /// Voice gateway opcodes.
    VoiceOpcode {
        Identify = 0,
        SelectProtocol = 1,
        Ready = 2,
        Heartbeat = 3,
        SessionDescription = 4,
        Speaking = 5,
        HeartbeatAck = 6,
        Hello = 8,
    }
}
