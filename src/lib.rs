//! Asynchronous LDAPv3 client.
//!
//! Many logical operations share one [`Connection`]; a reader task decodes
//! responses and the [`MessageAgent`](agent::MessageAgent) hands each one to
//! the [`MessageQueue`] waiting on its message ID. [`LdapConnection`] layers
//! the LDAP operations, bind handling and referral chasing on top.

pub mod agent;
pub mod asn1;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod queue;
pub mod registry;
pub mod sasl;
pub mod tokiou;
pub mod transport;
pub mod url;

pub use agent::{BindState, MessageAgent};
pub use client::{LdapConnection, SearchResults};
pub use config::{Constraints, LdapConfig, RebindCredentials};
pub use connection::{BoxFuture, Connection, Connector, TcpConnector};
pub use error::{CodecError, LdapError, Result};
pub use queue::MessageQueue;
pub use registry::Registry;
