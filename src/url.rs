//! LDAP URLs as carried in referrals (RFC 4516, without extensions).

use std::fmt;
use std::str::FromStr;

use crate::error::{LdapError, Result};
use crate::ldap::SearchScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ldap,
    Ldaps,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ldap => 389,
            Scheme::Ldaps => 636,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub dn: Option<String>,
    pub attributes: Vec<String>,
    pub scope: Option<SearchScope>,
    pub filter: Option<String>,
}

impl LdapUrl {
    pub fn parse(s: &str) -> Result<Self> {
        let bad = |why: &str| LdapError::Url(format!("{}: {}", why, s));
        let (scheme, rest) = match s.split_once("://") {
            Some((sch, rest)) if sch.eq_ignore_ascii_case("ldap") => (Scheme::Ldap, rest),
            Some((sch, rest)) if sch.eq_ignore_ascii_case("ldaps") => (Scheme::Ldaps, rest),
            _ => return Err(bad("unsupported scheme")),
        };
        let (hostport, path) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };

        let (host, port) = if let Some(v6) = hostport.strip_prefix('[') {
            let (host, after) = v6.split_once(']').ok_or_else(|| bad("unterminated ipv6 host"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(bad("garbage after ipv6 host")),
            };
            (host.to_owned(), port)
        } else {
            match hostport.rsplit_once(':') {
                Some((h, p)) => (h.to_owned(), Some(p)),
                None => (hostport.to_owned(), None),
            }
        };
        let port = match port {
            Some(p) if !p.is_empty() => p.parse().map_err(|_| bad("invalid port"))?,
            _ => scheme.default_port(),
        };
        let host = if host.is_empty() {
            "localhost".to_owned()
        } else {
            percent_decode(&host)?
        };

        let mut url = LdapUrl {
            scheme,
            host,
            port,
            dn: None,
            attributes: Vec::new(),
            scope: None,
            filter: None,
        };
        let Some(path) = path else {
            return Ok(url);
        };
        let mut parts = path.splitn(5, '?');
        if let Some(dn) = parts.next().filter(|d| !d.is_empty()) {
            url.dn = Some(percent_decode(dn)?);
        }
        if let Some(attrs) = parts.next().filter(|a| !a.is_empty()) {
            url.attributes = attrs
                .split(',')
                .map(percent_decode)
                .collect::<Result<_>>()?;
        }
        if let Some(scope) = parts.next().filter(|s| !s.is_empty()) {
            url.scope = Some(match scope.to_ascii_lowercase().as_str() {
                "base" => SearchScope::BaseObject,
                "one" => SearchScope::SingleLevel,
                "sub" => SearchScope::WholeSubtree,
                _ => return Err(bad("invalid scope")),
            });
        }
        if let Some(filter) = parts.next().filter(|f| !f.is_empty()) {
            url.filter = Some(percent_decode(filter)?);
        }
        Ok(url)
    }

    /// `host:port`, suitable for a socket connect.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for LdapUrl {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self> {
        LdapUrl::parse(s)
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Ldap => "ldap",
            Scheme::Ldaps => "ldaps",
        };
        write!(f, "{}://{}/", scheme, self.address())?;
        if let Some(dn) = &self.dn {
            f.write_str(dn)?;
        }
        Ok(())
    }
}

fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let v = bytes
                .get(i + 1..i + 3)
                .and_then(|d| hex::decode(d).ok())
                .ok_or_else(|| LdapError::Url(format!("bad percent escape in {}", s)))?;
            out.extend(v);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| LdapError::Url(format!("invalid utf-8 in {}", s)))
}
