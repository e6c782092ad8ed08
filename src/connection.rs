use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, trace};

use crate::agent::{BindState, MessageAgent};
use crate::codec;
use crate::config::{Constraints, LdapConfig};
use crate::error::{LdapError, Result};
use crate::ldap::{BindAuth, Control, Message, MessageId, MessageParams, MessageType};
use crate::queue::MessageQueue;
use crate::transport::Transport;
use crate::url::{LdapUrl, Scheme};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Opens connections for the initial server and for referral targets.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &LdapUrl, config: &LdapConfig) -> BoxFuture<Result<Connection>>;
}

/// Plain TCP, `ldap://` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, url: &LdapUrl, config: &LdapConfig) -> BoxFuture<Result<Connection>> {
        let url = url.clone();
        let config = config.clone();
        Box::pin(async move { Connection::connect(&url, &config).await })
    }
}

struct ConnectionInner {
    agent: Arc<MessageAgent>,
    transport: Transport,
    bind_permits: Arc<Semaphore>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.transport.shutdown();
        self.agent.fail_all("connection closed");
    }
}

/// One physical connection shared by any number of logical operations.
///
/// Clones share the connection; it is torn down when the last clone goes away.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub async fn connect(url: &LdapUrl, config: &LdapConfig) -> Result<Self> {
        if url.scheme == Scheme::Ldaps {
            return Err(LdapError::Url(format!(
                "{}: ldaps needs a TLS capable connector",
                url
            )));
        }
        let addr = url.address();
        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )
            })??;
        stream.set_nodelay(true)?;
        let conn = Self::from_stream(stream, config.max_pdu_size());
        info!(conn = conn.id(), %addr, "connected");
        Ok(conn)
    }

    /// Runs the protocol over an already established stream.
    pub fn from_stream<S>(stream: S, max_pdu: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let agent = Arc::new(MessageAgent::new());
        let transport = Transport::start(stream, agent.clone(), max_pdu);
        debug!(conn = agent.id(), "transport started");
        Self {
            inner: Arc::new(ConnectionInner {
                agent,
                transport,
                bind_permits: Arc::new(Semaphore::new(1)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.agent.id()
    }

    pub fn agent(&self) -> &Arc<MessageAgent> {
        &self.inner.agent
    }

    pub fn is_connected(&self) -> bool {
        self.inner.agent.is_connected() && !self.inner.transport.is_closed()
    }

    pub fn bind_state(&self) -> BindState {
        self.inner.agent.bind_state()
    }

    /// Waits until no other bind is in flight on this connection.
    pub async fn acquire_bind(&self) -> Result<OwnedSemaphorePermit> {
        self.inner
            .bind_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LdapError::ConnectionLost("bind gate closed".to_owned()))
    }

    pub fn new_queue(&self, constraints: &Constraints) -> MessageQueue {
        MessageQueue::new(self.inner.agent.clone(), constraints.time_limit())
    }

    /// Registers, encodes and writes one request.
    ///
    /// The new message ID is added to `queue` when given, otherwise to a fresh
    /// queue. Bind requests first take the connection's bind permit unless the
    /// queue already holds it.
    pub async fn send_request(
        &self,
        params: MessageParams,
        controls: Vec<Control>,
        constraints: &Constraints,
        queue: Option<MessageQueue>,
    ) -> Result<MessageQueue> {
        let kind = params.message_type();
        let Some(expected) = kind.expected_reply() else {
            return Err(LdapError::Local {
                message_id: 0,
                expected: None,
                reason: format!("{:?} is not a request that gets a reply", kind),
            });
        };
        let mut queue = match queue {
            Some(q) if q.belongs_to(&self.inner.agent) => q,
            Some(_) => {
                return Err(LdapError::Local {
                    message_id: 0,
                    expected: Some(expected),
                    reason: "queue belongs to another connection".to_owned(),
                })
            }
            None => self.new_queue(constraints),
        };

        let mut bind_intent = None;
        if let MessageParams::Bind(b) = &params {
            if !queue.holds_bind_permit() {
                queue.hold_bind_permit(self.acquire_bind().await?);
            }
            bind_intent = Some(match &b.auth {
                BindAuth::Simple(password) if b.name.is_empty() && password.is_empty() => {
                    BindState::Anonymous
                }
                BindAuth::Simple(_) => BindState::SimpleBound { dn: b.name.clone() },
                BindAuth::Sasl { mechanism, .. } => BindState::SaslBound {
                    mechanism: mechanism.clone(),
                    props: Default::default(),
                },
            });
        }

        let message_id = self.inner.agent.register_next(expected, bind_intent)?;
        queue.add_message_id(message_id);
        let pdu = codec::encode(&Message {
            id: message_id,
            params,
            controls,
        });
        trace!(conn = self.id(), message_id, pdu = %hex::encode(&pdu), "sending");
        if let Err(e) = self.inner.transport.write(pdu).await {
            self.inner.agent.abandon(message_id);
            return Err(e);
        }
        debug!(conn = self.id(), message_id, ?kind, "request sent");
        Ok(queue)
    }

    async fn send_unregistered(&self, params: MessageParams) -> Result<MessageId> {
        let message_id = self.inner.agent.next_message_id();
        let pdu = codec::encode(&Message::new(message_id, params));
        self.inner.transport.write(pdu).await?;
        Ok(message_id)
    }

    fn is_pending_bind(&self, message_id: MessageId) -> bool {
        matches!(
            self.inner.agent.expected_reply(message_id),
            Ok(MessageType::BindResponse)
        )
    }

    /// Forgets `message_id` locally and, if the server may still be working
    /// on it, sends an AbandonRequest.
    ///
    /// Binds cannot be abandoned (RFC 4511 4.11); asking for it is a `Local` error.
    pub async fn abandon(&self, message_id: MessageId) -> Result<()> {
        if self.is_pending_bind(message_id) {
            return Err(LdapError::Local {
                message_id,
                expected: Some(MessageType::BindResponse),
                reason: "a bind cannot be abandoned".to_owned(),
            });
        }
        if self.inner.agent.abandon(message_id) {
            let id = self
                .send_unregistered(MessageParams::Abandon(message_id))
                .await?;
            debug!(conn = self.id(), message_id, abandon_id = id, "abandon sent");
        }
        Ok(())
    }

    /// Abandons every operation of `queue` that is still outstanding, binds excepted.
    pub async fn abandon_queue(&self, queue: &MessageQueue) -> Result<()> {
        for &id in queue.message_ids() {
            if !self.is_pending_bind(id) {
                self.abandon(id).await?;
            }
        }
        Ok(())
    }

    /// Sends an UnbindRequest and closes the connection for every holder.
    pub async fn unbind(&self) -> Result<()> {
        let res = self.send_unregistered(MessageParams::Unbind).await;
        self.inner.agent.fail_all("unbound");
        self.inner.transport.shutdown();
        info!(conn = self.id(), "unbound");
        res.map(|_| ())
    }
}
