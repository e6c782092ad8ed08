//! Message-ID bookkeeping and response dispatch for one connection.
//!
//! The reader task calls [`MessageAgent::dispatch`] for every decoded PDU;
//! callers suspend in [`MessageAgent::get_response`]. The map lock is only
//! held to move messages in and out of the per-operation buffers, never
//! across a wait.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::error::{LdapError, Result};
use crate::ldap::{Message, MessageId, MessageParams, MessageType, ResultCode};

/// Message IDs wrap back to 1 after this value; 0 is reserved for unsolicited notifications.
pub const MAX_MESSAGE_ID: MessageId = i32::MAX;

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BindState {
    #[default]
    Anonymous,
    SimpleBound {
        dn: String,
    },
    SaslNegotiating {
        mechanism: String,
    },
    SaslBound {
        mechanism: String,
        props: BTreeMap<String, String>,
    },
}

impl BindState {
    pub fn is_bound(&self) -> bool {
        matches!(self, BindState::SimpleBound { .. } | BindState::SaslBound { .. })
    }

    fn in_progress(&self) -> BindState {
        match self {
            BindState::SaslBound { mechanism, .. } => BindState::SaslNegotiating {
                mechanism: mechanism.clone(),
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Unsolicited,
}

struct PendingOperation {
    expected: MessageType,
    buffer: VecDeque<Message>,
    complete: bool,
    failure: Option<LdapError>,
    // auth state the connection adopts when this bind succeeds
    bind: Option<BindState>,
}

impl PendingOperation {
    fn new(expected: MessageType, bind: Option<BindState>) -> Self {
        Self {
            expected,
            buffer: VecDeque::new(),
            complete: false,
            failure: None,
            bind,
        }
    }

    fn accepts(&self, got: MessageType) -> bool {
        got == self.expected
            || got == MessageType::IntermediateResponse
            || (self.expected == MessageType::SearchResultDone
                && matches!(
                    got,
                    MessageType::SearchResultEntry | MessageType::SearchResultReference
                ))
    }
}

struct AgentState {
    ops: HashMap<MessageId, PendingOperation>,
    next_id: MessageId,
    connected: bool,
    bind_state: BindState,
    listeners: Vec<mpsc::UnboundedSender<Message>>,
}

#[derive(Clone, Copy)]
enum Scope<'a> {
    Any,
    One(MessageId),
    Set(&'a [MessageId]),
}

impl Scope<'_> {
    fn first_id(&self) -> Option<MessageId> {
        match self {
            Scope::Any => None,
            Scope::One(id) => Some(*id),
            Scope::Set(ids) => ids.first().copied(),
        }
    }
}

pub struct MessageAgent {
    id: u64,
    state: Mutex<AgentState>,
    notify: Notify,
}

impl Default for MessageAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAgent {
    pub fn new() -> Self {
        Self::with_initial_id(1)
    }

    /// An agent whose first allocated message ID is `next` (clamped into `1..=MAX_MESSAGE_ID`).
    pub fn with_initial_id(next: MessageId) -> Self {
        Self {
            id: NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(AgentState {
                ops: HashMap::new(),
                next_id: next.max(1),
                connected: true,
                bind_state: BindState::Anonymous,
                listeners: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Debug identifier used in log fields.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(st: &mut AgentState) -> MessageId {
        loop {
            let id = st.next_id;
            st.next_id = if id >= MAX_MESSAGE_ID { 1 } else { id + 1 };
            if !st.ops.contains_key(&id) {
                return id;
            }
        }
    }

    /// A fresh ID for a request that expects no reply. It is not registered.
    pub fn next_message_id(&self) -> MessageId {
        Self::allocate(&mut self.lock())
    }

    pub fn register(
        &self,
        message_id: MessageId,
        expected_reply: MessageType,
        bind: Option<BindState>,
    ) -> Result<()> {
        let mut st = self.lock();
        if !st.connected {
            return Err(LdapError::ConnectionLost("connection is closed".to_owned()));
        }
        if message_id <= 0 {
            return Err(LdapError::Local {
                message_id,
                expected: Some(expected_reply),
                reason: "message ids must be positive".to_owned(),
            });
        }
        if st.ops.contains_key(&message_id) {
            return Err(LdapError::DuplicateMessageId(message_id));
        }
        st.ops
            .insert(message_id, PendingOperation::new(expected_reply, bind));
        trace!(conn = self.id, message_id, ?expected_reply, "registered");
        Ok(())
    }

    /// Allocates and registers in one step.
    pub fn register_next(
        &self,
        expected_reply: MessageType,
        bind: Option<BindState>,
    ) -> Result<MessageId> {
        let mut st = self.lock();
        if !st.connected {
            return Err(LdapError::ConnectionLost("connection is closed".to_owned()));
        }
        let message_id = Self::allocate(&mut st);
        st.ops
            .insert(message_id, PendingOperation::new(expected_reply, bind));
        trace!(conn = self.id, message_id, ?expected_reply, "registered");
        Ok(message_id)
    }

    pub fn dispatch(&self, msg: Message) -> Dispatch {
        let mut guard = self.lock();
        let st = &mut *guard;
        if msg.id != 0 {
            if let Some(op) = st.ops.get_mut(&msg.id) {
                let kind = msg.message_type();
                if !op.accepts(kind) {
                    warn!(conn = self.id, message_id = msg.id, ?kind, expected = ?op.expected, "unexpected response type");
                    op.failure = Some(LdapError::Local {
                        message_id: msg.id,
                        expected: Some(op.expected),
                        reason: format!("received {:?}", kind),
                    });
                    op.complete = true;
                } else {
                    if kind.is_terminal() {
                        op.complete = true;
                        if let (Some(intent), MessageParams::BindResponse(r)) =
                            (op.bind.take(), &msg.params)
                        {
                            st.bind_state = match r.result.code {
                                ResultCode::SUCCESS => intent,
                                ResultCode::SASL_BIND_IN_PROGRESS => intent.in_progress(),
                                _ => BindState::Anonymous,
                            };
                            debug!(conn = self.id, message_id = msg.id, state = ?st.bind_state, "bind state updated");
                        }
                    }
                    trace!(conn = self.id, message_id = msg.id, ?kind, "dispatched");
                    op.buffer.push_back(msg);
                }
                drop(guard);
                self.notify.notify_waiters();
                return Dispatch::Delivered;
            }
            debug!(conn = self.id, message_id = msg.id, "response for an id that is not outstanding");
        }
        st.listeners.retain(|l| !l.is_closed());
        if st.listeners.is_empty() {
            warn!(conn = self.id, message_id = msg.id, kind = ?msg.message_type(), "unsolicited message with no listener");
        }
        for l in &st.listeners {
            let _ = l.send(msg.clone());
        }
        Dispatch::Unsolicited
    }

    /// Receives messages with ID 0 and responses for IDs nobody waits for.
    pub fn subscribe_unsolicited(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut st = self.lock();
        if st.connected {
            st.listeners.push(tx);
        }
        rx
    }

    fn take_from(
        ops: &mut HashMap<MessageId, PendingOperation>,
        id: MessageId,
    ) -> Option<Result<Option<Message>>> {
        let Some(op) = ops.get_mut(&id) else {
            return Some(Ok(None));
        };
        if let Some(m) = op.buffer.pop_front() {
            if op.complete && op.buffer.is_empty() && op.failure.is_none() {
                ops.remove(&id);
            }
            return Some(Ok(Some(m)));
        }
        if let Some(e) = op.failure.take() {
            ops.remove(&id);
            return Some(Err(e));
        }
        if op.complete {
            ops.remove(&id);
            return Some(Ok(None));
        }
        None
    }

    fn take_any(
        ops: &mut HashMap<MessageId, PendingOperation>,
        ids: impl IntoIterator<Item = MessageId>,
    ) -> Option<Result<Option<Message>>> {
        let mut waiting = false;
        for id in ids {
            match Self::take_from(ops, id) {
                Some(Ok(None)) => continue,
                Some(r) => return Some(r),
                None => waiting = true,
            }
        }
        if waiting {
            None
        } else {
            Some(Ok(None))
        }
    }

    fn try_take(&self, scope: Scope<'_>) -> Option<Result<Option<Message>>> {
        let mut st = self.lock();
        match scope {
            Scope::One(id) => Self::take_from(&mut st.ops, id),
            Scope::Set(ids) => Self::take_any(&mut st.ops, ids.iter().copied()),
            Scope::Any => {
                let ids: Vec<MessageId> = st.ops.keys().copied().collect();
                Self::take_any(&mut st.ops, ids)
            }
        }
    }

    async fn wait(&self, scope: Scope<'_>, timeout: Option<Duration>) -> Result<Option<Message>> {
        let waiting = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(r) = self.try_take(scope) {
                    return r;
                }
                notified.await;
            }
        };
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(r) => r,
                Err(_) => {
                    debug!(conn = self.id, message_id = ?scope.first_id(), "wait timed out");
                    Err(LdapError::Timeout(scope.first_id()))
                }
            },
            None => waiting.await,
        }
    }

    /// Next response for `message_id`, or for any outstanding operation when `None`.
    ///
    /// `Ok(None)` means the operation is complete and drained (or was never
    /// outstanding). On timeout the operation stays registered.
    pub async fn get_response(
        &self,
        message_id: Option<MessageId>,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        let scope = match message_id {
            Some(id) => Scope::One(id),
            None => Scope::Any,
        };
        self.wait(scope, timeout).await
    }

    /// Like [`get_response`](Self::get_response), restricted to `ids`.
    pub async fn get_response_in(
        &self,
        ids: &[MessageId],
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        self.wait(Scope::Set(ids), timeout).await
    }

    /// Drops all local state for `message_id`.
    ///
    /// Returns true when the operation had not completed yet, i.e. when the
    /// server may still be working on it and an AbandonRequest is warranted.
    pub fn abandon(&self, message_id: MessageId) -> bool {
        let removed = self.lock().ops.remove(&message_id);
        self.notify.notify_waiters();
        match removed {
            Some(op) => {
                debug!(conn = self.id, message_id, discarded = op.buffer.len(), "abandoned");
                !op.complete
            }
            None => false,
        }
    }

    pub fn is_complete(&self, message_id: MessageId) -> Result<bool> {
        self.lock()
            .ops
            .get(&message_id)
            .map(|op| op.complete)
            .ok_or(LdapError::UnknownMessageId(message_id))
    }

    /// The reply type `message_id` was registered for.
    pub fn expected_reply(&self, message_id: MessageId) -> Result<MessageType> {
        self.lock()
            .ops
            .get(&message_id)
            .map(|op| op.expected)
            .ok_or(LdapError::UnknownMessageId(message_id))
    }

    pub fn is_response_received(&self, message_id: MessageId) -> Result<bool> {
        self.lock()
            .ops
            .get(&message_id)
            .map(|op| !op.buffer.is_empty())
            .ok_or(LdapError::UnknownMessageId(message_id))
    }

    /// Marks the connection dead and fails every incomplete operation.
    ///
    /// Responses that were already buffered are still handed out before the error.
    pub fn fail_all(&self, reason: &str) {
        let mut st = self.lock();
        st.connected = false;
        st.bind_state = BindState::Anonymous;
        st.listeners.clear();
        let mut failed = 0;
        for op in st.ops.values_mut() {
            if !op.complete {
                op.failure = Some(LdapError::ConnectionLost(reason.to_owned()));
                op.complete = true;
                failed += 1;
            }
        }
        drop(st);
        self.notify.notify_waiters();
        if failed > 0 {
            warn!(conn = self.id, failed, reason, "connection lost with operations outstanding");
        } else {
            debug!(conn = self.id, reason, "connection closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn bind_state(&self) -> BindState {
        self.lock().bind_state.clone()
    }

    pub(crate) fn set_bind_state(&self, state: BindState) {
        self.lock().bind_state = state;
    }

    pub fn pending_count(&self) -> usize {
        self.lock().ops.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ldap::{LdapResult, MsgBindResponse, MsgExtendedResponse, MsgSearchResultEntry};
    use crate::registry::NOTICE_OF_DISCONNECTION_OID;

    fn done(id: MessageId) -> Message {
        Message::new(id, MessageParams::SearchResultDone(LdapResult::new(ResultCode::SUCCESS)))
    }

    fn entry(id: MessageId, dn: &str) -> Message {
        Message::new(
            id,
            MessageParams::SearchResultEntry(MsgSearchResultEntry {
                name: dn.to_owned(),
                attributes: vec![],
            }),
        )
    }

    fn bind_response(id: MessageId, code: ResultCode) -> Message {
        Message::new(
            id,
            MessageParams::BindResponse(MsgBindResponse {
                result: LdapResult::new(code),
                server_sasl_creds: None,
            }),
        )
    }

    #[tokio::test]
    async fn responses_stay_with_their_operation() {
        let agent = MessageAgent::new();
        let a = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        let b = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        assert_ne!(a, b);

        agent.dispatch(entry(a, "cn=a1"));
        agent.dispatch(entry(b, "cn=b1"));
        agent.dispatch(entry(a, "cn=a2"));

        let m = agent.get_response(Some(b), None).await.unwrap().unwrap();
        assert_eq!(m, entry(b, "cn=b1"));
        assert!(!agent.is_response_received(b).unwrap());
        assert!(agent.is_response_received(a).unwrap());
        assert_eq!(agent.get_response(Some(a), None).await.unwrap(), Some(entry(a, "cn=a1")));
        assert_eq!(agent.get_response(Some(a), None).await.unwrap(), Some(entry(a, "cn=a2")));
    }

    #[tokio::test]
    async fn dispatch_before_read_is_buffered() {
        let agent = MessageAgent::new();
        agent.register(5, MessageType::ModifyResponse, None).unwrap();
        let resp = Message::new(5, MessageParams::ModifyResponse(LdapResult::new(ResultCode::SUCCESS)));
        assert_eq!(agent.dispatch(resp.clone()), Dispatch::Delivered);
        assert!(agent.is_complete(5).unwrap());
        assert_eq!(agent.get_response(Some(5), None).await.unwrap(), Some(resp));
        assert_eq!(agent.get_response(Some(5), None).await.unwrap(), None);
        assert_eq!(agent.pending_count(), 0);
    }

    #[tokio::test]
    async fn search_is_fifo_then_terminal() {
        let agent = MessageAgent::new();
        let id = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        agent.dispatch(entry(id, "cn=1"));
        agent.dispatch(entry(id, "cn=2"));
        agent.dispatch(done(id));

        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), Some(entry(id, "cn=1")));
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), Some(entry(id, "cn=2")));
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), Some(done(id)));
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn abandoned_id_routes_to_unsolicited() {
        let agent = MessageAgent::new();
        let mut unsolicited = agent.subscribe_unsolicited();
        let id = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        agent.dispatch(entry(id, "cn=early"));

        assert!(agent.abandon(id));
        assert!(!agent.abandon(id));
        assert!(matches!(agent.is_complete(id), Err(LdapError::UnknownMessageId(_))));

        assert_eq!(agent.dispatch(entry(id, "cn=late")), Dispatch::Unsolicited);
        assert_eq!(unsolicited.recv().await, Some(entry(id, "cn=late")));
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn notice_with_id_zero_is_unsolicited() {
        let agent = MessageAgent::new();
        let mut unsolicited = agent.subscribe_unsolicited();
        let notice = Message::new(
            0,
            MessageParams::ExtendedResponse(MsgExtendedResponse {
                result: LdapResult::new(ResultCode::UNAVAILABLE),
                name: Some(NOTICE_OF_DISCONNECTION_OID.to_owned()),
                value: None,
            }),
        );
        assert_eq!(agent.dispatch(notice.clone()), Dispatch::Unsolicited);
        assert_eq!(unsolicited.recv().await, Some(notice));
    }

    #[tokio::test]
    async fn disconnect_wakes_every_waiter() {
        let agent = Arc::new(MessageAgent::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let id = agent.register_next(MessageType::SearchResultDone, None).unwrap();
            let agent = agent.clone();
            waiters.push(tokio::spawn(async move { agent.get_response(Some(id), None).await }));
        }
        tokio::task::yield_now().await;
        agent.fail_all("eof");

        for w in waiters {
            let r = w.await.unwrap();
            assert!(matches!(r, Err(LdapError::ConnectionLost(_))), "{:?}", r);
        }
        assert!(!agent.is_connected());
        assert!(matches!(
            agent.register_next(MessageType::AddResponse, None),
            Err(LdapError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn buffered_responses_survive_disconnect() {
        let agent = MessageAgent::new();
        let id = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        agent.dispatch(entry(id, "cn=1"));
        agent.fail_all("reset");
        agent.fail_all("reset again");
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), Some(entry(id, "cn=1")));
        assert!(agent.get_response(Some(id), None).await.unwrap_err().is_connection_lost());
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn timeout_keeps_operation_registered() {
        let agent = MessageAgent::new();
        let id = agent.register_next(MessageType::DelResponse, None).unwrap();
        let r = agent
            .get_response(Some(id), Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(r, Err(LdapError::Timeout(Some(x))) if x == id));
        assert!(!agent.is_complete(id).unwrap());

        let resp = Message::new(id, MessageParams::DeleteResponse(LdapResult::new(ResultCode::SUCCESS)));
        agent.dispatch(resp.clone());
        assert_eq!(agent.get_response(Some(id), None).await.unwrap(), Some(resp));
    }

    #[tokio::test]
    async fn waiter_wakes_on_dispatch() {
        let agent = Arc::new(MessageAgent::new());
        let id = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        let waiter = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.get_response(None, None).await })
        };
        tokio::task::yield_now().await;
        agent.dispatch(entry(id, "cn=x"));
        assert_eq!(waiter.await.unwrap().unwrap(), Some(entry(id, "cn=x")));
    }

    #[tokio::test]
    async fn any_scope_ends_when_nothing_is_outstanding() {
        let agent = MessageAgent::new();
        assert_eq!(agent.get_response(None, None).await.unwrap(), None);
        let a = agent.register_next(MessageType::CompareResponse, None).unwrap();
        let resp = Message::new(a, MessageParams::CompareResponse(LdapResult::new(ResultCode::COMPARE_TRUE)));
        agent.dispatch(resp.clone());
        assert_eq!(agent.get_response(None, None).await.unwrap(), Some(resp));
        assert_eq!(agent.get_response(None, None).await.unwrap(), None);
    }

    #[test]
    fn duplicate_and_unknown_ids() {
        let agent = MessageAgent::new();
        agent.register(9, MessageType::AddResponse, None).unwrap();
        assert!(matches!(
            agent.register(9, MessageType::AddResponse, None),
            Err(LdapError::DuplicateMessageId(9))
        ));
        assert!(matches!(agent.is_complete(10), Err(LdapError::UnknownMessageId(10))));
        assert!(matches!(
            agent.is_response_received(10),
            Err(LdapError::UnknownMessageId(10))
        ));
        assert!(agent.register(0, MessageType::AddResponse, None).is_err());
    }

    #[test]
    fn ids_wrap_and_skip_zero_and_busy() {
        let agent = MessageAgent::with_initial_id(MAX_MESSAGE_ID);
        agent.register(1, MessageType::AddResponse, None).unwrap();
        assert_eq!(
            agent.register_next(MessageType::AddResponse, None).unwrap(),
            MAX_MESSAGE_ID
        );
        assert_eq!(agent.next_message_id(), 2);
        assert_eq!(agent.register_next(MessageType::AddResponse, None).unwrap(), 3);
    }

    #[tokio::test]
    async fn bind_state_follows_bind_result() {
        let agent = MessageAgent::new();
        let intent = BindState::SimpleBound { dn: "cn=admin".to_owned() };

        let id = agent.register_next(MessageType::BindResponse, Some(intent.clone())).unwrap();
        agent.dispatch(bind_response(id, ResultCode::SUCCESS));
        assert_eq!(agent.bind_state(), intent);

        let id = agent.register_next(MessageType::BindResponse, Some(intent)).unwrap();
        agent.dispatch(bind_response(id, ResultCode::INVALID_CREDENTIALS));
        assert_eq!(agent.bind_state(), BindState::Anonymous);

        let sasl = BindState::SaslBound {
            mechanism: "PLAIN".to_owned(),
            props: BTreeMap::new(),
        };
        let id = agent.register_next(MessageType::BindResponse, Some(sasl.clone())).unwrap();
        agent.dispatch(bind_response(id, ResultCode::SASL_BIND_IN_PROGRESS));
        assert_eq!(
            agent.bind_state(),
            BindState::SaslNegotiating { mechanism: "PLAIN".to_owned() }
        );
        let id = agent.register_next(MessageType::BindResponse, Some(sasl.clone())).unwrap();
        agent.dispatch(bind_response(id, ResultCode::SUCCESS));
        assert_eq!(agent.bind_state(), sasl);
        assert!(agent.bind_state().is_bound());
    }

    #[tokio::test]
    async fn wrong_response_type_is_a_local_error() {
        let agent = MessageAgent::new();
        let id = agent.register_next(MessageType::ModifyResponse, None).unwrap();
        agent.dispatch(done(id));
        match agent.get_response(Some(id), None).await {
            Err(LdapError::Local { message_id, expected, .. }) => {
                assert_eq!(message_id, id);
                assert_eq!(expected, Some(MessageType::ModifyResponse));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn scoped_wait_only_sees_its_ids() {
        let agent = MessageAgent::new();
        let a = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        let b = agent.register_next(MessageType::SearchResultDone, None).unwrap();
        agent.dispatch(entry(b, "cn=b"));
        let r = agent
            .get_response_in(&[a], Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(r, Err(LdapError::Timeout(Some(x))) if x == a));
        agent.dispatch(done(a));
        let next = agent.get_response_in(&[a, b], None).await.unwrap();
        assert!(next.is_some());
    }
}
