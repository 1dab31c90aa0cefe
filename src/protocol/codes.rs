//! CONNACK return codes (MQTT v3.1.1, table 3.1)

use std::fmt;

/// CONNACK connect return code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectCode {
    /// Connection accepted
    #[default]
    Accepted = 0x00,
    /// The server does not support the requested protocol level
    UnacceptableProtocolVersion = 0x01,
    /// The client identifier is not allowed by the server
    IdentifierRejected = 0x02,
    /// The network connection was made but the MQTT service is unavailable
    ServerUnavailable = 0x03,
    /// The data in the user name or password is malformed or wrong
    BadUsernameOrPassword = 0x04,
    /// The client is not authorized to connect
    NotAuthorized = 0x05,
}

impl ConnectCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(ConnectCode::Accepted),
            0x01 => Some(ConnectCode::UnacceptableProtocolVersion),
            0x02 => Some(ConnectCode::IdentifierRejected),
            0x03 => Some(ConnectCode::ServerUnavailable),
            0x04 => Some(ConnectCode::BadUsernameOrPassword),
            0x05 => Some(ConnectCode::NotAuthorized),
            _ => None,
        }
    }

    #[inline]
    pub fn is_accepted(self) -> bool {
        self == ConnectCode::Accepted
    }
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectCode::Accepted => write!(f, "connection accepted"),
            ConnectCode::UnacceptableProtocolVersion => {
                write!(f, "unacceptable protocol version")
            }
            ConnectCode::IdentifierRejected => write!(f, "identifier rejected"),
            ConnectCode::ServerUnavailable => write!(f, "server unavailable"),
            ConnectCode::BadUsernameOrPassword => write!(f, "bad user name or password"),
            ConnectCode::NotAuthorized => write!(f, "not authorized"),
        }
    }
}
