//! Client side of SASL mechanisms used in bind exchanges.

use std::collections::BTreeMap;

use crate::error::{LdapError, Result};

/// One SASL mechanism's client state machine.
///
/// The bind loop sends the initial response (when the mechanism has one),
/// then feeds every server challenge to [`evaluate_challenge`](Self::evaluate_challenge)
/// until the server reports success.
pub trait SaslClient: Send {
    fn mechanism_name(&self) -> &str;

    fn has_initial_response(&self) -> bool;

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    fn is_complete(&self) -> bool;

    /// Properties agreed on during the exchange, kept in the bind state.
    fn negotiated_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// RFC 4616.
pub struct Plain {
    authz_id: String,
    authc_id: String,
    password: String,
    complete: bool,
}

impl Plain {
    pub fn new(authc_id: &str, password: &str) -> Self {
        Self {
            authz_id: String::new(),
            authc_id: authc_id.to_owned(),
            password: password.to_owned(),
            complete: false,
        }
    }

    pub fn with_authz_id(mut self, authz_id: &str) -> Self {
        self.authz_id = authz_id.to_owned();
        self
    }
}

impl SaslClient for Plain {
    fn mechanism_name(&self) -> &str {
        "PLAIN"
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        if self.complete {
            return Err(LdapError::Sasl(format!(
                "PLAIN got an unexpected challenge of {} bytes",
                challenge.len()
            )));
        }
        self.complete = true;
        let mut out = Vec::with_capacity(self.authz_id.len() + self.authc_id.len() + self.password.len() + 2);
        out.extend_from_slice(self.authz_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.authc_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.password.as_bytes());
        Ok(out)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn negotiated_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("authcid".to_owned(), self.authc_id.clone())])
    }
}

/// RFC 4422 appendix A; the credentials come from the TLS layer or the socket.
#[derive(Default)]
pub struct External {
    authz_id: String,
    complete: bool,
}

impl External {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authz_id(authz_id: &str) -> Self {
        Self {
            authz_id: authz_id.to_owned(),
            complete: false,
        }
    }
}

impl SaslClient for External {
    fn mechanism_name(&self) -> &str {
        "EXTERNAL"
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        if self.complete {
            return Err(LdapError::Sasl("EXTERNAL takes a single round".to_owned()));
        }
        self.complete = true;
        Ok(self.authz_id.as_bytes().to_vec())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

#[test]
fn plain_message() {
    let mut m = Plain::new("tim", "tanstaaftanstaaf");
    assert!(m.has_initial_response());
    assert!(!m.is_complete());
    let out = m.evaluate_challenge(&[]).unwrap();
    assert_eq!(out, b"\0tim\0tanstaaftanstaaf");
    assert!(m.is_complete());
    assert!(m.evaluate_challenge(b"more").is_err());
    assert_eq!(m.negotiated_properties().get("authcid").map(String::as_str), Some("tim"));
}

#[test]
fn plain_with_authz() {
    let mut m = Plain::new("Kurt", "xipj3plmq").with_authz_id("Ursel");
    assert_eq!(m.evaluate_challenge(&[]).unwrap(), b"Ursel\0Kurt\0xipj3plmq");
}

#[test]
fn external_single_round() {
    let mut m = External::with_authz_id("dn:cn=app");
    assert_eq!(m.mechanism_name(), "EXTERNAL");
    assert_eq!(m.evaluate_challenge(&[]).unwrap(), b"dn:cn=app");
    assert!(m.evaluate_challenge(&[]).is_err());
    assert!(External::new().evaluate_challenge(&[]).unwrap().is_empty());
}
