use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{CodecError, LdapError, Result};
use crate::ldap::Message;
use crate::{asn1, codec};

pub const DEFAULT_MAX_PDU: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Reassembles LDAPMessages from a byte stream.
///
/// By default only server responses are accepted; a request operation on the
/// stream is a decode error.
pub struct DecodeContext {
    buffer: Vec<u8>,
    max_pdu: usize,
    requests: bool,
}

impl DecodeContext {
    pub fn new() -> Self {
        Self::with_max_pdu(DEFAULT_MAX_PDU)
    }

    pub fn with_max_pdu(max_pdu: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
            max_pdu,
            requests: false,
        }
    }

    /// Reads the client side of a conversation, for servers and test peers.
    pub fn for_requests() -> Self {
        Self {
            requests: true,
            ..Self::new()
        }
    }

    /// Reads until one whole message is buffered and returns it.
    ///
    /// EOF surfaces as `ConnectionLost`; an oversized or malformed PDU as `Decode`.
    pub async fn get_message<R: AsyncRead + Unpin>(&mut self, s: &mut R) -> Result<Message> {
        loop {
            if let Some(len) = asn1::pdu_len(&self.buffer)? {
                if len > self.max_pdu {
                    return Err(CodecError::TooLarge(len).into());
                }
            }
            let parsed = if self.requests {
                codec::parse_message(&self.buffer)?
            } else {
                codec::parse_response(&self.buffer)?
            };
            if let Some((msg, used)) = parsed {
                trace!(message_id = msg.id, pdu = %hex::encode(&self.buffer[..used]), "received");
                self.buffer.drain(..used);
                return Ok(msg);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = s.read(&mut chunk).await?;
            if n == 0 {
                let reason = if self.buffer.is_empty() {
                    "connection closed by peer"
                } else {
                    "connection closed in the middle of a message"
                };
                return Err(LdapError::ConnectionLost(reason.to_owned()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self::new()
    }
}
