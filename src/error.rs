use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Not the leader, current leader is {0:?}")]
    NotLeader(Option<String>),

    #[error("Raft core not started")]
    NotStarted,

    #[error("Instance {0} not found among discovered cluster members")]
    InstanceNotFound(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected reply type: expected {expected}, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
