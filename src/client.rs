use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::agent::BindState;
use crate::config::{Constraints, LdapConfig};
use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::{LdapError, Result};
use crate::filter;
use crate::ldap::{
    BindAuth, Control, DerefAliases, FilterAttributeValueAssertion, LdapResult, Message,
    MessageId, MessageParams, MessageType, Modification, MsgAdd, MsgBind, MsgCompare,
    MsgExtended, MsgExtendedResponse, MsgModify, MsgModifyDn, MsgSearch, MsgSearchResultEntry,
    PartialAttribute, ResultCode, SearchScope,
};
use crate::queue::MessageQueue;
use crate::registry::{Decoded, Registry, WhoAmIResponse, WHOAMI_OID};
use crate::sasl::SaslClient;
use crate::url::LdapUrl;

/// Everything a search produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    pub entries: Vec<MsgSearchResultEntry>,
    /// Continuation references that were not followed.
    pub references: Vec<String>,
    pub result: LdapResult,
}

/// Client-facing handle: one current connection plus the operations on it.
///
/// Referrals are chased on separate connections opened through the
/// configured [`Connector`]; the current connection only changes through
/// [`reconnect`](Self::reconnect).
pub struct LdapConnection {
    conn: RwLock<Connection>,
    config: LdapConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<Registry>,
}

impl LdapConnection {
    pub async fn connect(config: LdapConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TcpConnector)).await
    }

    pub async fn with_connector(config: LdapConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let url = LdapUrl::parse(&config.url)?;
        let conn = connector.connect(&url, &config).await?;
        Ok(Self::from_connection(conn, config, connector))
    }

    pub fn from_connection(conn: Connection, config: LdapConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            conn: RwLock::new(conn),
            config,
            connector,
            registry: Registry::global(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn connection(&self) -> Connection {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_connected()
    }

    pub fn bind_state(&self) -> BindState {
        self.connection().bind_state()
    }

    /// Replaces the current connection with a fresh one to the configured URL.
    ///
    /// Operations still pending on the old connection fail once its last
    /// holder lets go. The new connection starts anonymous.
    pub async fn reconnect(&self) -> Result<()> {
        let url = LdapUrl::parse(&self.config.url)?;
        let fresh = self.connector.connect(&url, &self.config).await?;
        let old = {
            let mut guard = self.conn.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, fresh)
        };
        info!(old = old.id(), new = self.connection().id(), "reconnected");
        Ok(())
    }

    pub fn subscribe_unsolicited(&self) -> mpsc::UnboundedReceiver<Message> {
        self.connection().agent().subscribe_unsolicited()
    }

    pub fn decode_control(&self, control: &Control) -> Result<Decoded> {
        Ok(self.registry.decode_control(control)?)
    }

    pub async fn simple_bind(&self, dn: &str, password: &str) -> Result<LdapResult> {
        simple_bind_on(&self.connection(), &self.config.constraints, dn, password).await
    }

    /// Runs a SASL exchange, holding the bind permit across all of its rounds.
    pub async fn sasl_bind(&self, mech: &mut dyn SaslClient) -> Result<LdapResult> {
        let conn = self.connection();
        let constraints = &self.config.constraints;
        let mechanism = mech.mechanism_name().to_owned();
        let mut queue = conn.new_queue(constraints);
        queue.hold_bind_permit(conn.acquire_bind().await?);

        let mut credentials = if mech.has_initial_response() {
            Some(mech.evaluate_challenge(&[])?)
        } else {
            None
        };
        loop {
            let params = MessageParams::Bind(MsgBind {
                version: 3,
                name: String::new(),
                auth: BindAuth::Sasl {
                    mechanism: mechanism.clone(),
                    credentials: credentials.take(),
                },
            });
            queue = conn.send_request(params, vec![], constraints, Some(queue)).await?;
            let resp = final_response(&conn, &mut queue).await?;
            let resp = match resp.params {
                MessageParams::BindResponse(r) => r,
                other => {
                    return Err(unexpected(resp.id, MessageType::BindResponse, other.message_type()))
                }
            };
            match resp.result.code {
                ResultCode::SUCCESS => {
                    if let Some(last) = resp.server_sasl_creds.as_deref() {
                        if !mech.is_complete() {
                            if let Err(e) = mech.evaluate_challenge(last) {
                                // mutual authentication failed
                                conn.agent().set_bind_state(BindState::Anonymous);
                                return Err(e);
                            }
                        }
                    }
                    conn.agent().set_bind_state(BindState::SaslBound {
                        mechanism,
                        props: mech.negotiated_properties(),
                    });
                    info!(conn = conn.id(), mechanism = %mech.mechanism_name(), "sasl bind complete");
                    return Ok(resp.result);
                }
                ResultCode::SASL_BIND_IN_PROGRESS => {
                    let challenge = resp.server_sasl_creds.unwrap_or_default();
                    trace!(conn = conn.id(), challenge = %hex::encode(&challenge), "sasl challenge");
                    match mech.evaluate_challenge(&challenge) {
                        Ok(reply) => credentials = Some(reply),
                        Err(e) => {
                            conn.agent().set_bind_state(BindState::Anonymous);
                            return Err(e);
                        }
                    }
                }
                _ => return resp.result.success(),
            }
        }
    }

    /// Searches with a string filter, chasing referrals per the configured constraints.
    pub async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<SearchResults> {
        let req = MsgSearch {
            base_object: base.to_owned(),
            scope,
            deref: DerefAliases::NeverDerefAliases,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: filter::parse(filter)?,
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        };
        self.search_with(req, vec![]).await
    }

    /// Runs `req` to completion.
    ///
    /// Size and time limit results still return what arrived; any other
    /// failure code is an error. A continuation reference that cannot be
    /// followed is kept in [`SearchResults::references`].
    pub async fn search_with(&self, req: MsgSearch, controls: Vec<Control>) -> Result<SearchResults> {
        let constraints = &self.config.constraints;
        let mut entries = Vec::new();
        let mut references = Vec::new();
        let mut outcome = None;
        // (connection, request, hops left, whether this is the caller's own search)
        let mut work = VecDeque::from([(self.connection(), req, constraints.referral_hop_limit, true)]);

        while let Some((conn, req, hops, primary)) = work.pop_front() {
            let sent = conn
                .send_request(MessageParams::Search(req.clone()), controls.clone(), constraints, None)
                .await;
            let mut queue = match sent {
                Ok(queue) => queue,
                Err(e) if primary => return Err(e),
                Err(e) => {
                    warn!(conn = conn.id(), error = %e, "continuation search not sent");
                    continue;
                }
            };
            let failure = loop {
                let msg = match queue.get_response().await {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                };
                let step = match msg.params {
                    MessageParams::SearchResultEntry(e) => {
                        entries.push(e);
                        Ok(())
                    }
                    MessageParams::SearchResultReference(urls) if !constraints.follow_referrals => {
                        references.extend(urls);
                        Ok(())
                    }
                    MessageParams::SearchResultReference(urls) if hops == 0 => {
                        Err(LdapError::ReferralLimitExceeded(urls))
                    }
                    MessageParams::SearchResultReference(urls) => {
                        match self.chase_search(&req, &urls).await {
                            Ok((next, next_req)) => work.push_back((next, next_req, hops - 1, false)),
                            Err(e) => {
                                warn!(referral = ?urls, error = %e, "continuation reference not followed");
                                references.extend(urls);
                            }
                        }
                        Ok(())
                    }
                    MessageParams::SearchResultDone(r)
                        if r.code == ResultCode::REFERRAL
                            && constraints.follow_referrals
                            && !r.referrals.is_empty() =>
                    {
                        if hops == 0 {
                            Err(LdapError::ReferralLimitExceeded(r.referrals))
                        } else {
                            self.chase_search(&req, &r.referrals).await.map(|(next, next_req)| {
                                work.push_back((next, next_req, hops - 1, primary))
                            })
                        }
                    }
                    MessageParams::SearchResultDone(r) => {
                        if primary {
                            outcome = Some(r);
                        } else if !r.is_success() {
                            warn!(code = %r.code, diag = %r.diag, "continuation search failed");
                        }
                        Ok(())
                    }
                    MessageParams::Intermediate(_) => {
                        trace!(message_id = msg.id, "intermediate response");
                        Ok(())
                    }
                    other => Err(unexpected(msg.id, MessageType::SearchResultDone, other.message_type())),
                };
                if let Err(e) = step {
                    break Some(e);
                }
            };
            if let Some(e) = failure {
                let e = give_up(&conn, &mut queue, e).await;
                if primary || matches!(e, LdapError::ReferralLimitExceeded(_)) {
                    return Err(e);
                }
                warn!(conn = conn.id(), error = %e, "continuation search failed");
            }
        }

        let result = outcome.ok_or_else(|| LdapError::Local {
            message_id: 0,
            expected: Some(MessageType::SearchResultDone),
            reason: "search ended without a result".to_owned(),
        })?;
        match result.code {
            ResultCode::SUCCESS | ResultCode::SIZE_LIMIT_EXCEEDED | ResultCode::TIME_LIMIT_EXCEEDED => {
                Ok(SearchResults {
                    entries,
                    references,
                    result,
                })
            }
            _ => Err(result.into_error()),
        }
    }

    /// Raw responses of one search, as they arrive. Referrals are not chased.
    pub async fn search_stream(
        &self,
        req: MsgSearch,
        controls: Vec<Control>,
    ) -> Result<impl Stream<Item = Result<Message>> + Send> {
        let queue = self
            .connection()
            .send_request(MessageParams::Search(req), controls, &self.config.constraints, None)
            .await?;
        Ok(queue.into_stream())
    }

    pub async fn add(&self, entry: &str, attributes: Vec<PartialAttribute>) -> Result<LdapResult> {
        let params = MessageParams::Add(MsgAdd {
            entry: entry.to_owned(),
            attributes,
        });
        self.single(params, vec![]).await?.success()
    }

    pub async fn modify(&self, object: &str, changes: Vec<Modification>) -> Result<LdapResult> {
        let params = MessageParams::Modify(MsgModify {
            object: object.to_owned(),
            changes,
        });
        self.single(params, vec![]).await?.success()
    }

    pub async fn delete(&self, dn: &str) -> Result<LdapResult> {
        self.single(MessageParams::Delete(dn.to_owned()), vec![])
            .await?
            .success()
    }

    pub async fn modify_dn(
        &self,
        entry: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> Result<LdapResult> {
        let params = MessageParams::ModifyDn(MsgModifyDn {
            entry: entry.to_owned(),
            new_rdn: new_rdn.to_owned(),
            delete_old_rdn,
            new_superior: new_superior.map(str::to_owned),
        });
        self.single(params, vec![]).await?.success()
    }

    /// True for compareTrue, false for compareFalse, an error for anything else.
    pub async fn compare(&self, entry: &str, attribute: &str, value: &[u8]) -> Result<bool> {
        let params = MessageParams::Compare(MsgCompare {
            entry: entry.to_owned(),
            assertion: FilterAttributeValueAssertion {
                name: attribute.to_owned(),
                value: value.to_vec(),
            },
        });
        let r = self.single(params, vec![]).await?;
        match r.code {
            ResultCode::COMPARE_TRUE => Ok(true),
            ResultCode::COMPARE_FALSE => Ok(false),
            _ => Err(r.into_error()),
        }
    }

    pub async fn extended(&self, name: &str, value: Option<Vec<u8>>) -> Result<MsgExtendedResponse> {
        let params = MessageParams::Extended(MsgExtended {
            name: name.to_owned(),
            value,
        });
        let msg = self.single_message(params, vec![]).await?;
        match msg.params {
            MessageParams::ExtendedResponse(r) if r.result.is_success() => Ok(r),
            MessageParams::ExtendedResponse(r) => Err(r.result.into_error()),
            other => Err(unexpected(msg.id, MessageType::ExtendedResponse, other.message_type())),
        }
    }

    /// The authorization identity the server associates with this connection (RFC 4532).
    pub async fn whoami(&self) -> Result<String> {
        let resp = self.extended(WHOAMI_OID, None).await?;
        let decoded = self
            .registry
            .decode_response(WHOAMI_OID, resp.value.as_deref())?;
        Ok(match decoded.downcast_ref::<WhoAmIResponse>() {
            Some(w) => w.authz_id.clone(),
            None => String::from_utf8_lossy(&resp.value.unwrap_or_default()).into_owned(),
        })
    }

    pub async fn abandon(&self, message_id: MessageId) -> Result<()> {
        self.connection().abandon(message_id).await
    }

    pub async fn unbind(&self) -> Result<()> {
        self.connection().unbind().await
    }

    async fn single(&self, params: MessageParams, controls: Vec<Control>) -> Result<LdapResult> {
        let msg = self.single_message(params, controls).await?;
        let id = msg.id;
        let kind = msg.message_type();
        msg.params.into_result().ok_or(LdapError::Local {
            message_id: id,
            expected: None,
            reason: format!("{:?} carries no result", kind),
        })
    }

    // Sends a request with a single final response, following referrals.
    async fn single_message(&self, mut params: MessageParams, controls: Vec<Control>) -> Result<Message> {
        let constraints = &self.config.constraints;
        let mut hops = constraints.referral_hop_limit;
        let mut conn = self.connection();
        loop {
            let mut queue = conn
                .send_request(params.clone(), controls.clone(), constraints, None)
                .await?;
            let resp = final_response(&conn, &mut queue).await?;
            let referrals = match resp.params.result() {
                Some(r)
                    if r.code == ResultCode::REFERRAL
                        && constraints.follow_referrals
                        && !r.referrals.is_empty() =>
                {
                    Some(r.referrals.clone())
                }
                _ => None,
            };
            let Some(referrals) = referrals else {
                return Ok(resp);
            };
            if hops == 0 {
                return Err(LdapError::ReferralLimitExceeded(referrals));
            }
            hops -= 1;
            let (next, url) = self.open_referral(&referrals).await?;
            if let Some(dn) = url.dn.as_deref() {
                retarget(&mut params, dn);
            }
            conn = next;
        }
    }

    async fn chase_search(&self, req: &MsgSearch, urls: &[String]) -> Result<(Connection, MsgSearch)> {
        let (conn, url) = self.open_referral(urls).await?;
        Ok((conn, retarget_search(req, &url)?))
    }

    // Connects to the first reachable URL and binds with the rebind credentials.
    async fn open_referral(&self, urls: &[String]) -> Result<(Connection, LdapUrl)> {
        let mut last_err = None;
        for raw in urls {
            let url = match LdapUrl::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!(referral = %raw, error = %e, "skipping referral");
                    last_err = Some(e);
                    continue;
                }
            };
            let conn = match self.connector.connect(&url, &self.config).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(referral = %raw, error = %e, "referral target unreachable");
                    last_err = Some(e);
                    continue;
                }
            };
            let constraints = &self.config.constraints;
            if let Some(creds) = &constraints.rebind {
                simple_bind_on(&conn, constraints, &creds.dn, &creds.password).await?;
            }
            debug!(conn = conn.id(), referral = %raw, "following referral");
            return Ok((conn, url));
        }
        Err(last_err.unwrap_or_else(|| LdapError::Url("referral without urls".to_owned())))
    }
}

async fn simple_bind_on(
    conn: &Connection,
    constraints: &Constraints,
    dn: &str,
    password: &str,
) -> Result<LdapResult> {
    let params = MessageParams::Bind(MsgBind {
        version: 3,
        name: dn.to_owned(),
        auth: BindAuth::Simple(password.to_owned()),
    });
    let mut queue = conn.send_request(params, vec![], constraints, None).await?;
    let resp = final_response(conn, &mut queue).await?;
    match resp.params {
        MessageParams::BindResponse(r) => r.result.success(),
        other => Err(unexpected(resp.id, MessageType::BindResponse, other.message_type())),
    }
}

// First non-intermediate response of the newest request in `queue`.
async fn final_response(conn: &Connection, queue: &mut MessageQueue) -> Result<Message> {
    let Some(&id) = queue.message_ids().last() else {
        return Err(LdapError::Local {
            message_id: 0,
            expected: None,
            reason: "empty queue".to_owned(),
        });
    };
    loop {
        match queue.get_response_for(id).await {
            Ok(Some(m)) if m.message_type() == MessageType::IntermediateResponse => {
                trace!(message_id = id, "intermediate response");
            }
            Ok(Some(m)) => return Ok(m),
            Ok(None) => {
                return Err(LdapError::Local {
                    message_id: id,
                    expected: None,
                    reason: "operation ended without a result".to_owned(),
                })
            }
            Err(e) => return Err(give_up(conn, queue, e).await),
        }
    }
}

// A caller that gives up leaves nothing registered behind. Binds cannot be
// abandoned: one still holding the permit is waited out in the background.
async fn give_up(conn: &Connection, queue: &mut MessageQueue, e: LdapError) -> LdapError {
    if queue.holds_bind_permit() {
        debug!(conn = conn.id(), error = %e, "bind outcome pending, keeping the bind permit");
        queue.detach().drain_in_background();
    } else if let Err(abandon_err) = conn.abandon_queue(queue).await {
        debug!(conn = conn.id(), error = %abandon_err, "abandon after error failed");
    }
    e
}

fn unexpected(message_id: MessageId, expected: MessageType, got: MessageType) -> LdapError {
    LdapError::Local {
        message_id,
        expected: Some(expected),
        reason: format!("received {:?}", got),
    }
}

fn retarget(params: &mut MessageParams, dn: &str) {
    let target = match params {
        MessageParams::Search(s) => &mut s.base_object,
        MessageParams::Modify(m) => &mut m.object,
        MessageParams::Add(a) => &mut a.entry,
        MessageParams::Delete(d) => d,
        MessageParams::ModifyDn(m) => &mut m.entry,
        MessageParams::Compare(c) => &mut c.entry,
        _ => return,
    };
    *target = dn.to_owned();
}

fn retarget_search(req: &MsgSearch, url: &LdapUrl) -> Result<MsgSearch> {
    let mut next = req.clone();
    if let Some(dn) = &url.dn {
        next.base_object = dn.clone();
    }
    if let Some(scope) = url.scope {
        next.scope = scope;
    }
    if let Some(f) = &url.filter {
        next.filter = filter::parse(f)?;
    }
    Ok(next)
}
