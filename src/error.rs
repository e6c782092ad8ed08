use thiserror::Error;

use crate::ldap::{MessageId, MessageType, ResultCode};

/// Failures while framing or decoding BER.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated data")]
    Truncated,
    #[error("unexpected tag: expected {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("invalid length encoding")]
    InvalidLength,
    #[error("indefinite length is not allowed in LDAP")]
    IndefiniteLength,
    #[error("pdu of {0} bytes exceeds the configured maximum")]
    TooLarge(usize),
    #[error("integer does not fit")]
    IntegerOverflow,
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("unknown protocol operation tag {0:#04x}")]
    UnknownOperation(u8),
    #[error("trailing bytes after {0}")]
    TrailingData(&'static str),
    #[error("{0} is not valid here")]
    Invalid(&'static str),
}

impl From<std::io::Error> for CodecError {
    fn from(_: std::io::Error) -> Self {
        // the cursor readers only fail by running out of input
        CodecError::Truncated
    }
}

#[derive(Debug, Error)]
pub enum LdapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// The server answered with a non-success result code.
    #[error("server returned {code}: {diag}")]
    Protocol {
        code: ResultCode,
        matched_dn: String,
        diag: String,
    },

    /// The plumbing between the caller and the connection broke.
    #[error("message {message_id}: {reason} (expected {expected:?})")]
    Local {
        message_id: MessageId,
        expected: Option<MessageType>,
        reason: String,
    },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out waiting for a response to {0:?}")]
    Timeout(Option<MessageId>),

    #[error("referral limit exceeded, unfollowed referrals: {0:?}")]
    ReferralLimitExceeded(Vec<String>),

    #[error("message id {0} is not outstanding")]
    UnknownMessageId(MessageId),

    #[error("message id {0} is already registered")]
    DuplicateMessageId(MessageId),

    #[error("sasl: {0}")]
    Sasl(String),

    #[error("invalid ldap url: {0}")]
    Url(String),

    #[error("invalid filter: {0}")]
    Filter(String),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl LdapError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, LdapError::ConnectionLost(_))
    }
}

pub type Result<T, E = LdapError> = std::result::Result<T, E>;
