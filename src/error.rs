use std::fmt;

#[derive(Debug)]
#[allow(dead_code)]
pub enum LbError {
    Config(String),
    MembershipWatch(String),
    IdentityMissing,
    NoRoute,
    UpgradeFailure(String),
    UpstreamDial(String),
    PumpError(String),
    Internal(String),
}

impl fmt::Display for LbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LbError::Config(msg) => write!(f, "config error: {}", msg),
            LbError::MembershipWatch(msg) => write!(f, "membership watch error: {}", msg),
            LbError::IdentityMissing => write!(f, "missing ws-user-id header"),
            LbError::NoRoute => write!(f, "no route for identity"),
            LbError::UpgradeFailure(msg) => write!(f, "websocket upgrade failed: {}", msg),
            LbError::UpstreamDial(msg) => write!(f, "upstream dial failed: {}", msg),
            LbError::PumpError(msg) => write!(f, "pump error: {}", msg),
            LbError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for LbError {}

impl From<tokio_tungstenite::tungstenite::Error> for LbError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LbError::UpstreamDial(e.to_string())
    }
}

impl From<std::io::Error> for LbError {
    fn from(e: std::io::Error) -> Self {
        LbError::PumpError(e.to_string())
    }
}
