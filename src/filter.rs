//! String representation of search filters (RFC 4515).

use crate::error::{LdapError, Result};
use crate::ldap::{
    Filter, FilterAttributeValueAssertion, FilterExtensible, FilterSubstrings, SubstringPart,
    MAX_FILTER_DEPTH,
};

/// Parses `(&(objectClass=person)(cn=J*))` style filters.
///
/// A bare item without the outer parentheses (`cn=foo`) is accepted too.
pub fn parse(s: &str) -> Result<Filter> {
    let trimmed = s.trim();
    let wrapped;
    let input = if trimmed.starts_with('(') {
        trimmed
    } else {
        wrapped = format!("({})", trimmed);
        wrapped.as_str()
    };
    let mut p = Parser {
        input: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let f = p.filter()?;
    if p.pos != p.input.len() {
        return Err(p.error("trailing characters"));
    }
    Ok(f)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, what: &str) -> LdapError {
        LdapError::Filter(format!("{} at offset {}", what, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        if self.depth == MAX_FILTER_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let f = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        self.depth -= 1;
        Ok(f)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        while self.peek() == Some(b'(') {
            items.push(self.filter()?);
        }
        Ok(items)
    }

    fn token(&mut self, stops: &[u8]) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.pos += 1;
        }
        let input: &'a [u8] = self.input;
        // stops are all ASCII, so the slice boundaries fall on char boundaries
        std::str::from_utf8(&input[start..self.pos]).unwrap_or_default()
    }

    fn raw_value(&mut self) -> Result<&'a str> {
        let v = self.token(b"()");
        if self.peek() != Some(b')') {
            return Err(self.error("unterminated value"));
        }
        Ok(v)
    }

    fn item(&mut self) -> Result<Filter> {
        let attr = self.token(b"=~<>:()").to_owned();
        match self.peek() {
            Some(b'~') | Some(b'>') | Some(b'<') => {
                let op = self.input[self.pos];
                self.pos += 1;
                self.expect(b'=')?;
                if attr.is_empty() {
                    return Err(self.error("missing attribute"));
                }
                let ava = FilterAttributeValueAssertion {
                    name: attr,
                    value: unescape(self.raw_value()?)?,
                };
                Ok(match op {
                    b'~' => Filter::ApproxMatch(ava),
                    b'>' => Filter::GreaterOrEqual(ava),
                    _ => Filter::LessOrEqual(ava),
                })
            }
            Some(b':') => self.extensible(attr),
            Some(b'=') => {
                self.pos += 1;
                if attr.is_empty() {
                    return Err(self.error("missing attribute"));
                }
                let raw = self.raw_value()?;
                if raw == "*" {
                    return Ok(Filter::Present(attr));
                }
                if !raw.contains('*') {
                    return Ok(Filter::EqualityMatch(FilterAttributeValueAssertion {
                        name: attr,
                        value: unescape(raw)?,
                    }));
                }
                let pieces: Vec<&str> = raw.split('*').collect();
                let last = pieces.len() - 1;
                let mut parts = Vec::new();
                for (i, piece) in pieces.into_iter().enumerate() {
                    if piece.is_empty() {
                        continue;
                    }
                    let v = unescape(piece)?;
                    parts.push(if i == 0 {
                        SubstringPart::Initial(v)
                    } else if i == last {
                        SubstringPart::Final(v)
                    } else {
                        SubstringPart::Any(v)
                    });
                }
                Ok(Filter::Substrings(FilterSubstrings { name: attr, parts }))
            }
            _ => Err(self.error("expected filter operator")),
        }
    }

    fn extensible(&mut self, attr: String) -> Result<Filter> {
        let mut dn_attributes = false;
        let mut rule = None;
        loop {
            self.expect(b':')?;
            if self.peek() == Some(b'=') {
                self.pos += 1;
                break;
            }
            let tok = self.token(b":=()");
            if tok.eq_ignore_ascii_case("dn") {
                dn_attributes = true;
            } else if !tok.is_empty() {
                rule = Some(tok.to_owned());
            } else {
                return Err(self.error("empty extensible component"));
            }
        }
        if attr.is_empty() && rule.is_none() {
            return Err(self.error("extensible match needs a type or a rule"));
        }
        Ok(Filter::ExtensibleMatch(FilterExtensible {
            rule,
            name: if attr.is_empty() { None } else { Some(attr) },
            value: unescape(self.raw_value()?)?,
            dn_attributes,
        }))
    }
}

fn unescape(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let digits = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| LdapError::Filter(format!("truncated escape in {:?}", s)))?;
            let v = hex::decode(digits)
                .map_err(|_| LdapError::Filter(format!("bad escape in {:?}", s)))?;
            out.extend(v);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}
