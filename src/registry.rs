//! OID keyed decoders for extended responses, intermediate responses and controls.
//!
//! A miss never fails: the value comes back as [`Decoded::Generic`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::asn1::{Decoder, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE};
use crate::error::{CodecError, Result};
use crate::ldap::Control;

pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

type Factory =
    Arc<dyn Fn(Option<&[u8]>) -> Result<Box<dyn Any + Send + Sync>, CodecError> + Send + Sync>;

fn erase<F, T>(factory: F) -> Factory
where
    F: Fn(Option<&[u8]>) -> Result<T, CodecError> + Send + Sync + 'static,
    T: Any + Send + Sync,
{
    Arc::new(move |value: Option<&[u8]>| {
        factory(value).map(|t| Box::new(t) as Box<dyn Any + Send + Sync>)
    })
}

pub enum Decoded {
    Typed(Box<dyn Any + Send + Sync>),
    Generic { oid: String, value: Option<Vec<u8>> },
}

impl Decoded {
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Decoded::Typed(v) => v.downcast_ref(),
            Decoded::Generic { .. } => None,
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Decoded::Generic { .. })
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Typed(_) => f.write_str("Decoded::Typed(..)"),
            Decoded::Generic { oid, value } => f
                .debug_struct("Decoded::Generic")
                .field("oid", oid)
                .field("value", &value.as_ref().map(hex::encode))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoAmIResponse {
    /// Empty for anonymous sessions, otherwise `dn:...` or `u:...`.
    pub authz_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeOfDisconnection;

/// RFC 2696 control value, as found on a SearchResultDone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResults {
    pub size: i64,
    pub cookie: Vec<u8>,
}

#[derive(Default)]
pub struct Registry {
    responses: RwLock<HashMap<String, Factory>>,
    controls: RwLock<HashMap<String, Factory>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the decoders this crate knows about.
    pub fn with_defaults() -> Self {
        let r = Self::new();
        r.register_response(WHOAMI_OID, |value| {
            let authz_id = String::from_utf8_lossy(value.unwrap_or_default()).into_owned();
            Ok(WhoAmIResponse { authz_id })
        });
        r.register_response(NOTICE_OF_DISCONNECTION_OID, |_| Ok(NoticeOfDisconnection));
        r.register_control(PAGED_RESULTS_OID, |value| {
            let value = value.ok_or(CodecError::Invalid("empty paged results control"))?;
            let mut outer = Decoder::new(value);
            let mut seq = outer.sequence(TAG_SEQUENCE)?;
            let size = seq.read_int(TAG_INTEGER)?;
            let cookie = seq.read_octets(TAG_OCTET_STRING)?;
            Ok(PagedResults { size, cookie })
        });
        r
    }

    /// Process-wide registry, populated with the defaults on first use.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(Registry::with_defaults()))
            .clone()
    }

    pub fn register_response<F, T>(&self, oid: &str, factory: F)
    where
        F: Fn(Option<&[u8]>) -> Result<T, CodecError> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(oid.to_owned(), erase(factory));
    }

    pub fn register_control<F, T>(&self, oid: &str, factory: F)
    where
        F: Fn(Option<&[u8]>) -> Result<T, CodecError> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        self.controls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(oid.to_owned(), erase(factory));
    }

    fn lookup(map: &RwLock<HashMap<String, Factory>>, oid: &str) -> Option<Factory> {
        map.read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(oid)
            .cloned()
    }

    /// Decodes the value of an extended or intermediate response named `oid`.
    pub fn decode_response(&self, oid: &str, value: Option<&[u8]>) -> Result<Decoded, CodecError> {
        match Self::lookup(&self.responses, oid) {
            Some(factory) => factory(value).map(Decoded::Typed),
            None => Ok(Decoded::Generic {
                oid: oid.to_owned(),
                value: value.map(<[u8]>::to_vec),
            }),
        }
    }

    pub fn decode_control(&self, control: &Control) -> Result<Decoded, CodecError> {
        match Self::lookup(&self.controls, &control.oid) {
            Some(factory) => factory(control.value.as_deref()).map(Decoded::Typed),
            None => Ok(Decoded::Generic {
                oid: control.oid.clone(),
                value: control.value.clone(),
            }),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let responses = self.responses.read().unwrap_or_else(PoisonError::into_inner).len();
        let controls = self.controls.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Registry")
            .field("responses", &responses)
            .field("controls", &controls)
            .finish()
    }
}
