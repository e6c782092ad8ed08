use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace};

use crate::agent::MessageAgent;
use crate::error::{LdapError, Result};
use crate::ldap::{Message, MessageId, MessageParams, ResultCode};

/// Caller-side handle over the responses to one or more requests.
///
/// Dropping a queue does not abandon its operations; call
/// [`Connection::abandon`](crate::connection::Connection::abandon) for that.
pub struct MessageQueue {
    agent: Arc<MessageAgent>,
    ids: Vec<MessageId>,
    timeout: Option<Duration>,
    bind_permit: Option<OwnedSemaphorePermit>,
}

impl MessageQueue {
    pub(crate) fn new(agent: Arc<MessageAgent>, timeout: Option<Duration>) -> Self {
        Self {
            agent,
            ids: Vec::new(),
            timeout,
            bind_permit: None,
        }
    }

    pub(crate) fn add_message_id(&mut self, id: MessageId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    pub(crate) fn holds_bind_permit(&self) -> bool {
        self.bind_permit.is_some()
    }

    pub(crate) fn hold_bind_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.bind_permit = Some(permit);
    }

    pub(crate) fn belongs_to(&self, agent: &Arc<MessageAgent>) -> bool {
        Arc::ptr_eq(&self.agent, agent)
    }

    pub fn message_ids(&self) -> &[MessageId] {
        &self.ids
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Next response for any of this queue's requests; `Ok(None)` once all are done.
    pub async fn get_response(&mut self) -> Result<Option<Message>> {
        let r = self.agent.get_response_in(&self.ids, self.timeout).await;
        self.settle(&r);
        r
    }

    pub async fn get_response_for(&mut self, id: MessageId) -> Result<Option<Message>> {
        if !self.ids.contains(&id) {
            return Err(LdapError::UnknownMessageId(id));
        }
        let r = self.agent.get_response(Some(id), self.timeout).await;
        self.settle(&r);
        r
    }

    pub fn is_complete(&self, id: MessageId) -> Result<bool> {
        self.agent.is_complete(id)
    }

    pub fn is_response_received(&self, id: MessageId) -> Result<bool> {
        self.agent.is_response_received(id)
    }

    // A bind is over once its response is consumed, unless the server asked
    // for another SASL round.
    fn settle(&mut self, r: &Result<Option<Message>>) {
        if self.bind_permit.is_none() {
            return;
        }
        let release = match r {
            Ok(Some(Message {
                params: MessageParams::BindResponse(b),
                ..
            })) => b.result.code != ResultCode::SASL_BIND_IN_PROGRESS,
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => !matches!(e, LdapError::Timeout(_)),
        };
        if release {
            trace!(conn = self.agent.id(), "bind permit released");
            self.bind_permit = None;
        }
    }

    /// Moves the outstanding IDs and the bind permit into a queue of their own.
    pub(crate) fn detach(&mut self) -> MessageQueue {
        MessageQueue {
            agent: self.agent.clone(),
            ids: std::mem::take(&mut self.ids),
            timeout: self.timeout,
            bind_permit: self.bind_permit.take(),
        }
    }

    /// Waits out the operations in the background, dropping their responses.
    ///
    /// A bind whose caller gave up keeps the permit until the server answers,
    /// so no other bind is sent while its outcome is unknown. The bind state
    /// still follows the late response.
    pub(crate) fn drain_in_background(mut self) {
        self.timeout = None;
        let conn = self.agent.id();
        tokio::spawn(async move {
            loop {
                match self.get_response().await {
                    Ok(Some(m)) => trace!(conn, message_id = m.id, "late response drained"),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(conn, error = %e, "drain ended");
                        break;
                    }
                }
            }
        });
    }

    /// Lazily yields responses until the queue is drained. An error ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> + Send {
        stream::unfold(Some(self), |queue| async move {
            let mut queue = queue?;
            match queue.get_response().await {
                Ok(Some(m)) => Some((Ok(m), Some(queue))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
