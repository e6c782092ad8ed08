mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use common::{bind_response, done, entry, pair, referral, respond_ok, result, MemoryConnector};
use lds_client::ldap::{
    BindAuth, DerefAliases, Filter, Message, MessageParams, MessageType, Modification,
    ModifyOperation, MsgExtendedResponse, MsgSearch, PartialAttribute, ResultCode, SearchScope,
};
use lds_client::registry::{NoticeOfDisconnection, NOTICE_OF_DISCONNECTION_OID, WHOAMI_OID};
use lds_client::sasl::SaslClient;
use lds_client::{
    BindState, Constraints, LdapConfig, LdapConnection, LdapError, RebindCredentials,
    TcpConnector,
};

fn client_over(conn: lds_client::Connection) -> Arc<LdapConnection> {
    Arc::new(LdapConnection::from_connection(
        conn,
        LdapConfig::default(),
        Arc::new(TcpConnector),
    ))
}

fn replace_mail() -> Vec<Modification> {
    vec![Modification {
        operation: ModifyOperation::Replace,
        attribute: PartialAttribute::new("mail", &["x@example.com"]),
    }]
}

fn search_all(base: &str) -> MsgSearch {
    MsgSearch {
        base_object: base.to_owned(),
        scope: SearchScope::WholeSubtree,
        deref: DerefAliases::NeverDerefAliases,
        size_limit: 0,
        time_limit: 0,
        types_only: false,
        filter: Filter::Present("objectClass".to_owned()),
        attributes: vec![],
    }
}

#[tokio::test]
async fn concurrent_binds_are_serialized() {
    let (conn, mut server) = pair();
    let client = client_over(conn);

    let binds: Vec<_> = [("cn=a", "pa"), ("cn=b", "pb")]
        .into_iter()
        .map(|(dn, pw)| {
            let client = client.clone();
            tokio::spawn(async move { client.simple_bind(dn, pw).await })
        })
        .collect();

    let first = server.recv().await;
    let first_dn = match &first.params {
        MessageParams::Bind(b) => b.name.clone(),
        other => panic!("expected a bind, got {:?}", other),
    };

    // other operations are not held back by a bind in flight
    let deleting = {
        let client = client.clone();
        tokio::spawn(async move { client.delete("cn=gone").await })
    };
    let delete = server.recv().await;
    assert_eq!(delete.message_type(), MessageType::DelRequest);
    assert!(server.recv_within(50).await.is_none());

    server.send(bind_response(first.id, ResultCode::SUCCESS, None)).await;
    let second = server.recv().await;
    let second_dn = match &second.params {
        MessageParams::Bind(b) => b.name.clone(),
        other => panic!("expected a bind, got {:?}", other),
    };
    assert_ne!(first_dn, second_dn);
    server.send(bind_response(second.id, ResultCode::SUCCESS, None)).await;
    server
        .reply(delete.id, MessageParams::DeleteResponse(result(ResultCode::SUCCESS)))
        .await;

    for b in binds {
        b.await.unwrap().unwrap();
    }
    deleting.await.unwrap().unwrap();
    assert_eq!(client.bind_state(), BindState::SimpleBound { dn: second_dn });
}

#[tokio::test]
async fn failed_bind_falls_back_to_anonymous() {
    let (conn, mut server) = pair();
    let client = client_over(conn);
    let c = client.clone();
    let bind = tokio::spawn(async move { c.simple_bind("cn=a", "wrong").await });
    let req = server.recv().await;
    server.send(bind_response(req.id, ResultCode::INVALID_CREDENTIALS, None)).await;
    match bind.await.unwrap() {
        Err(LdapError::Protocol { code, .. }) => assert_eq!(code, ResultCode::INVALID_CREDENTIALS),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.bind_state(), BindState::Anonymous);
}

fn primary_refers_modify(req: &Message) -> Vec<Message> {
    match &req.params {
        MessageParams::Modify(_) => vec![Message::new(
            req.id,
            MessageParams::ModifyResponse(referral(&["ldap://other/cn=x,dc=other"])),
        )],
        _ => respond_ok(req),
    }
}

#[tokio::test]
async fn referral_followed_within_budget() {
    let connector = Arc::new(
        MemoryConnector::default()
            .host("primary", primary_refers_modify)
            .host("other", respond_ok),
    );
    let mut config = LdapConfig::new("ldap://primary/");
    config.constraints.referral_hop_limit = 1;
    config.constraints.rebind = Some(RebindCredentials {
        dn: "cn=referral".to_owned(),
        password: "secret".to_owned(),
    });
    let client = LdapConnection::with_connector(config, connector.clone())
        .await
        .unwrap();

    let r = client.modify("cn=x,dc=example", replace_mail()).await.unwrap();
    assert_eq!(r.code, ResultCode::SUCCESS);
    assert_eq!(connector.connect_count(), 2);

    let seen = connector.requests_to("other");
    assert_eq!(seen.len(), 2);
    match &seen[0].params {
        MessageParams::Bind(b) => {
            assert_eq!(b.name, "cn=referral");
            assert_eq!(b.auth, BindAuth::Simple("secret".to_owned()));
        }
        other => panic!("expected rebind, got {:?}", other),
    }
    match &seen[1].params {
        MessageParams::Modify(m) => assert_eq!(m.object, "cn=x,dc=other"),
        other => panic!("expected modify, got {:?}", other),
    }
}

#[tokio::test]
async fn referral_budget_zero_does_not_connect() {
    let connector = Arc::new(
        MemoryConnector::default()
            .host("primary", primary_refers_modify)
            .host("other", respond_ok),
    );
    let mut config = LdapConfig::new("ldap://primary/");
    config.constraints.referral_hop_limit = 0;
    let client = LdapConnection::with_connector(config, connector.clone())
        .await
        .unwrap();

    match client.modify("cn=x,dc=example", replace_mail()).await {
        Err(LdapError::ReferralLimitExceeded(urls)) => {
            assert_eq!(urls, vec!["ldap://other/cn=x,dc=other".to_owned()])
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(connector.connect_count(), 1);
    assert!(connector.requests_to("other").is_empty());
}

#[tokio::test]
async fn referral_chain_stops_at_budget() {
    let connector = Arc::new(
        MemoryConnector::default()
            .host("primary", primary_refers_modify)
            .host("other", |req: &Message| match &req.params {
                MessageParams::Modify(_) => vec![Message::new(
                    req.id,
                    MessageParams::ModifyResponse(referral(&["ldap://third/"])),
                )],
                _ => respond_ok(req),
            })
            .host("third", respond_ok),
    );
    let mut config = LdapConfig::new("ldap://primary/");
    config.constraints.referral_hop_limit = 1;
    let client = LdapConnection::with_connector(config, connector.clone())
        .await
        .unwrap();

    assert!(matches!(
        client.modify("cn=x", replace_mail()).await,
        Err(LdapError::ReferralLimitExceeded(_))
    ));
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn referrals_not_followed_when_disabled() {
    let connector = Arc::new(MemoryConnector::default().host("primary", primary_refers_modify));
    let mut config = LdapConfig::new("ldap://primary/");
    config.constraints.follow_referrals = false;
    let client = LdapConnection::with_connector(config, connector).await.unwrap();
    match client.modify("cn=x", replace_mail()).await {
        Err(LdapError::Protocol { code, .. }) => assert_eq!(code, ResultCode::REFERRAL),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn search_entries_arrive_in_order() {
    let (conn, mut server) = pair();
    let client = client_over(conn);
    let c = client.clone();
    let searching = tokio::spawn(async move {
        c.search("dc=example", SearchScope::WholeSubtree, "(objectClass=*)", &["cn"])
            .await
    });

    let req = server.recv().await;
    match &req.params {
        MessageParams::Search(s) => {
            assert_eq!(s.base_object, "dc=example");
            assert_eq!(s.attributes, vec!["cn".to_owned()]);
        }
        other => panic!("expected search, got {:?}", other),
    }
    server.send(entry(req.id, "cn=1,dc=example")).await;
    server.send(entry(req.id, "cn=2,dc=example")).await;
    server.send(done(req.id, ResultCode::SUCCESS)).await;

    let results = searching.await.unwrap().unwrap();
    let names: Vec<&str> = results.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["cn=1,dc=example", "cn=2,dc=example"]);
    assert!(results.references.is_empty());
    assert!(results.result.is_success());
    assert_eq!(client.connection().agent().pending_count(), 0);
}

#[tokio::test]
async fn search_failure_and_partial_results() {
    let (conn, mut server) = pair();
    let client = client_over(conn);

    let c = client.clone();
    let failing = tokio::spawn(async move {
        c.search("dc=missing", SearchScope::BaseObject, "(objectClass=*)", &[])
            .await
    });
    let req = server.recv().await;
    server.send(done(req.id, ResultCode::NO_SUCH_OBJECT)).await;
    assert!(matches!(
        failing.await.unwrap(),
        Err(LdapError::Protocol { code, .. }) if code == ResultCode::NO_SUCH_OBJECT
    ));

    let c = client.clone();
    let limited = tokio::spawn(async move {
        c.search("dc=example", SearchScope::WholeSubtree, "(cn=*)", &[]).await
    });
    let req = server.recv().await;
    server.send(entry(req.id, "cn=1")).await;
    server.send(done(req.id, ResultCode::SIZE_LIMIT_EXCEEDED)).await;
    let results = limited.await.unwrap().unwrap();
    assert_eq!(results.entries.len(), 1);
    assert_eq!(results.result.code, ResultCode::SIZE_LIMIT_EXCEEDED);
}

fn primary_with_continuation(req: &Message) -> Vec<Message> {
    match &req.params {
        MessageParams::Search(_) => vec![
            entry(req.id, "cn=1,dc=example"),
            Message::new(
                req.id,
                MessageParams::SearchResultReference(vec!["ldap://other/ou=sub,dc=other".to_owned()]),
            ),
            entry(req.id, "cn=2,dc=example"),
            done(req.id, ResultCode::SUCCESS),
        ],
        _ => respond_ok(req),
    }
}

#[tokio::test]
async fn continuation_references_are_chased() {
    let connector = Arc::new(
        MemoryConnector::default()
            .host("primary", primary_with_continuation)
            .host("other", |req: &Message| match &req.params {
                MessageParams::Search(_) => {
                    vec![entry(req.id, "cn=3,ou=sub,dc=other"), done(req.id, ResultCode::SUCCESS)]
                }
                _ => respond_ok(req),
            }),
    );
    let client = LdapConnection::with_connector(LdapConfig::new("ldap://primary/"), connector.clone())
        .await
        .unwrap();

    let results = client
        .search("dc=example", SearchScope::WholeSubtree, "(objectClass=*)", &[])
        .await
        .unwrap();
    let names: Vec<&str> = results.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["cn=1,dc=example", "cn=2,dc=example", "cn=3,ou=sub,dc=other"]
    );
    match &connector.requests_to("other")[0].params {
        MessageParams::Search(s) => assert_eq!(s.base_object, "ou=sub,dc=other"),
        other => panic!("expected search, got {:?}", other),
    }
}

#[tokio::test]
async fn search_over_referral_budget_abandons_the_search() {
    let (conn, mut server) = pair();
    let mut config = LdapConfig::default();
    config.constraints.referral_hop_limit = 0;
    let client = Arc::new(LdapConnection::from_connection(conn, config, Arc::new(TcpConnector)));
    let mut unsolicited = client.subscribe_unsolicited();

    let c = client.clone();
    let searching = tokio::spawn(async move {
        c.search("dc=example", SearchScope::WholeSubtree, "(objectClass=*)", &[])
            .await
    });
    let req = server.recv().await;
    server.send(entry(req.id, "cn=1,dc=example")).await;
    server
        .reply(
            req.id,
            MessageParams::SearchResultReference(vec!["ldap://other/".to_owned()]),
        )
        .await;

    match searching.await.unwrap() {
        Err(LdapError::ReferralLimitExceeded(urls)) => {
            assert_eq!(urls, vec!["ldap://other/".to_owned()])
        }
        other => panic!("unexpected {:?}", other),
    }
    let abandon = server.recv().await;
    assert_eq!(abandon.params, MessageParams::Abandon(req.id));
    assert_eq!(client.connection().agent().pending_count(), 0);

    server.send(done(req.id, ResultCode::SUCCESS)).await;
    assert_eq!(unsolicited.recv().await.unwrap().id, req.id);
}

#[tokio::test]
async fn unreachable_continuation_is_kept_as_reference() {
    let connector = Arc::new(MemoryConnector::default().host("primary", primary_with_continuation));
    let client = LdapConnection::with_connector(LdapConfig::new("ldap://primary/"), connector.clone())
        .await
        .unwrap();

    let results = client
        .search("dc=example", SearchScope::WholeSubtree, "(objectClass=*)", &[])
        .await
        .unwrap();
    let names: Vec<&str> = results.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["cn=1,dc=example", "cn=2,dc=example"]);
    assert_eq!(results.references, vec!["ldap://other/ou=sub,dc=other".to_owned()]);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(client.connection().agent().pending_count(), 0);
}

#[tokio::test]
async fn continuation_references_kept_when_not_following() {
    let connector = Arc::new(MemoryConnector::default().host("primary", primary_with_continuation));
    let mut config = LdapConfig::new("ldap://primary/");
    config.constraints.follow_referrals = false;
    let client = LdapConnection::with_connector(config, connector.clone())
        .await
        .unwrap();
    let results = client
        .search("dc=example", SearchScope::WholeSubtree, "(objectClass=*)", &[])
        .await
        .unwrap();
    assert_eq!(results.entries.len(), 2);
    assert_eq!(results.references, vec!["ldap://other/ou=sub,dc=other".to_owned()]);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn search_stream_yields_raw_responses() {
    let connector = Arc::new(MemoryConnector::default().host("primary", primary_with_continuation));
    let client = LdapConnection::with_connector(LdapConfig::new("ldap://primary/"), connector)
        .await
        .unwrap();
    let kinds: Vec<MessageType> = client
        .search_stream(search_all("dc=example"), vec![])
        .await
        .unwrap()
        .map(|m| m.unwrap().message_type())
        .collect()
        .await;
    assert_eq!(
        kinds,
        vec![
            MessageType::SearchResultEntry,
            MessageType::SearchResultReference,
            MessageType::SearchResultEntry,
            MessageType::SearchResultDone,
        ]
    );
}

#[tokio::test]
async fn notice_of_disconnection_goes_to_listeners() {
    let (conn, mut server) = pair();
    let client = client_over(conn);
    let mut unsolicited = client.subscribe_unsolicited();

    let c = client.clone();
    let pending = tokio::spawn(async move { c.delete("cn=a").await });
    server.recv().await;

    server
        .reply(
            0,
            MessageParams::ExtendedResponse(MsgExtendedResponse {
                result: result(ResultCode::UNAVAILABLE),
                name: Some(NOTICE_OF_DISCONNECTION_OID.to_owned()),
                value: None,
            }),
        )
        .await;
    let notice = unsolicited.recv().await.unwrap();
    assert_eq!(notice.id, 0);
    let MessageParams::ExtendedResponse(r) = &notice.params else {
        panic!("expected extended response, got {:?}", notice.params);
    };
    let decoded = client
        .registry()
        .decode_response(r.name.as_deref().unwrap(), r.value.as_deref())
        .unwrap();
    assert!(decoded.downcast_ref::<NoticeOfDisconnection>().is_some());

    drop(server);
    assert!(pending.await.unwrap().unwrap_err().is_connection_lost());
    assert!(!client.is_connected());
    assert!(unsolicited.recv().await.is_none());
}

#[tokio::test]
async fn abandoned_search_late_responses_are_unsolicited() {
    let (conn, mut server) = pair();
    let mut unsolicited = conn.agent().subscribe_unsolicited();
    let mut queue = conn
        .send_request(
            MessageParams::Search(search_all("dc=example")),
            vec![],
            &Constraints::default(),
            None,
        )
        .await
        .unwrap();
    let req = server.recv().await;
    conn.abandon(req.id).await.unwrap();

    let abandon = server.recv().await;
    assert_eq!(abandon.params, MessageParams::Abandon(req.id));

    server.send(entry(req.id, "cn=late")).await;
    let late = unsolicited.recv().await.unwrap();
    assert_eq!(late.id, req.id);
    assert!(queue.get_response().await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_fails_pending_then_reconnect() {
    let (conn, mut server) = pair();
    let connector = Arc::new(MemoryConnector::default().host("primary", respond_ok));
    let client = Arc::new(LdapConnection::from_connection(
        conn,
        LdapConfig::new("ldap://primary/"),
        connector.clone(),
    ));

    let pending: Vec<_> = ["cn=a", "cn=b", "cn=c"]
        .into_iter()
        .map(|dn| {
            let client = client.clone();
            tokio::spawn(async move { client.delete(dn).await })
        })
        .collect();
    for _ in 0..3 {
        server.recv().await;
    }
    drop(server);
    for p in pending {
        assert!(p.await.unwrap().unwrap_err().is_connection_lost());
    }
    assert!(!client.is_connected());
    assert!(client.delete("cn=a").await.unwrap_err().is_connection_lost());

    client.reconnect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.bind_state(), BindState::Anonymous);
    client.delete("cn=a").await.unwrap();
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn timeout_abandons_the_operation() {
    let (conn, mut server) = pair();
    let mut config = LdapConfig::default();
    config.constraints = Constraints::default().with_time_limit(Duration::from_millis(50));
    let client = Arc::new(LdapConnection::from_connection(conn, config, Arc::new(TcpConnector)));

    let c = client.clone();
    let deleting = tokio::spawn(async move { c.delete("cn=slow").await });
    let req = server.recv().await;
    let abandon = server.recv().await;
    assert_eq!(abandon.params, MessageParams::Abandon(req.id));
    assert!(matches!(
        deleting.await.unwrap(),
        Err(LdapError::Timeout(Some(id))) if id == req.id
    ));
    assert_eq!(client.connection().agent().pending_count(), 0);
}

#[tokio::test]
async fn timed_out_bind_holds_back_other_binds() {
    let (conn, mut server) = pair();
    let mut config = LdapConfig::default();
    config.constraints = Constraints::default().with_time_limit(Duration::from_millis(30));
    let hasty = LdapConnection::from_connection(conn.clone(), config, Arc::new(TcpConnector));
    let patient = client_over(conn);

    assert!(matches!(
        hasty.simple_bind("cn=a", "pa").await,
        Err(LdapError::Timeout(Some(_)))
    ));
    let first = server.recv().await;
    assert_eq!(first.message_type(), MessageType::BindRequest);

    let p = patient.clone();
    let second = tokio::spawn(async move { p.simple_bind("cn=b", "pb").await });
    // neither an abandon for the first bind nor the second bind goes out
    assert!(server.recv_within(80).await.is_none());

    server.send(bind_response(first.id, ResultCode::SUCCESS, None)).await;
    let next = server.recv().await;
    match &next.params {
        MessageParams::Bind(b) => assert_eq!(b.name, "cn=b"),
        other => panic!("expected a bind, got {:?}", other),
    }
    assert_eq!(patient.bind_state(), BindState::SimpleBound { dn: "cn=a".to_owned() });

    server.send(bind_response(next.id, ResultCode::SUCCESS, None)).await;
    second.await.unwrap().unwrap();
    assert_eq!(patient.bind_state(), BindState::SimpleBound { dn: "cn=b".to_owned() });
    assert_eq!(patient.connection().agent().pending_count(), 0);
}

#[tokio::test]
async fn whoami_and_compare() {
    let connector = Arc::new(MemoryConnector::default().host("primary", |req: &Message| {
        match &req.params {
            MessageParams::Extended(x) if x.name == WHOAMI_OID => vec![Message::new(
                req.id,
                MessageParams::ExtendedResponse(MsgExtendedResponse {
                    result: result(ResultCode::SUCCESS),
                    name: None,
                    value: Some(b"dn:cn=admin,dc=example".to_vec()),
                }),
            )],
            MessageParams::Compare(c) => {
                let code = if c.assertion.value == b"yes" {
                    ResultCode::COMPARE_TRUE
                } else {
                    ResultCode::COMPARE_FALSE
                };
                vec![Message::new(req.id, MessageParams::CompareResponse(result(code)))]
            }
            _ => respond_ok(req),
        }
    }));
    let client = LdapConnection::with_connector(LdapConfig::new("ldap://primary/"), connector)
        .await
        .unwrap();

    assert_eq!(client.whoami().await.unwrap(), "dn:cn=admin,dc=example");
    assert!(client.compare("cn=a", "flag", b"yes").await.unwrap());
    assert!(!client.compare("cn=a", "flag", b"no").await.unwrap());
    client
        .add("cn=new,dc=example", vec![PartialAttribute::new("objectClass", &["person"])])
        .await
        .unwrap();
    client
        .modify_dn("cn=new,dc=example", "cn=newer", true, None)
        .await
        .unwrap();
}

/// Two rounds: "hello", then the challenge echoed back.
struct TwoStep {
    rounds: usize,
    done: bool,
}

impl SaslClient for TwoStep {
    fn mechanism_name(&self) -> &str {
        "X-TWO-STEP"
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> lds_client::Result<Vec<u8>> {
        self.rounds += 1;
        if self.rounds == 1 {
            return Ok(b"hello".to_vec());
        }
        self.done = true;
        let mut out = b"re:".to_vec();
        out.extend_from_slice(challenge);
        Ok(out)
    }

    fn is_complete(&self) -> bool {
        self.done
    }

    fn negotiated_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("rounds".to_owned(), self.rounds.to_string())])
    }
}

fn sasl_credentials(msg: &Message) -> (String, Option<Vec<u8>>) {
    match &msg.params {
        MessageParams::Bind(b) => match &b.auth {
            BindAuth::Sasl { mechanism, credentials } => (mechanism.clone(), credentials.clone()),
            other => panic!("expected sasl, got {:?}", other),
        },
        other => panic!("expected bind, got {:?}", other),
    }
}

#[tokio::test]
async fn sasl_bind_takes_several_rounds() {
    let (conn, mut server) = pair();
    let client = client_over(conn);
    let c = client.clone();
    let binding = tokio::spawn(async move {
        let mut mech = TwoStep { rounds: 0, done: false };
        c.sasl_bind(&mut mech).await
    });

    let first = server.recv().await;
    assert_eq!(
        sasl_credentials(&first),
        ("X-TWO-STEP".to_owned(), Some(b"hello".to_vec()))
    );
    server
        .send(bind_response(first.id, ResultCode::SASL_BIND_IN_PROGRESS, Some(b"c1")))
        .await;

    let second = server.recv().await;
    assert_ne!(second.id, first.id);
    assert_eq!(sasl_credentials(&second).1, Some(b"re:c1".to_vec()));
    assert_eq!(
        client.bind_state(),
        BindState::SaslNegotiating { mechanism: "X-TWO-STEP".to_owned() }
    );

    // a simple bind has to wait for the whole exchange
    let c = client.clone();
    let waiting = tokio::spawn(async move { c.simple_bind("cn=next", "pw").await });
    assert!(server.recv_within(50).await.is_none());

    server.send(bind_response(second.id, ResultCode::SUCCESS, None)).await;
    binding.await.unwrap().unwrap();

    let next = server.recv().await;
    assert_eq!(next.message_type(), MessageType::BindRequest);
    server.send(bind_response(next.id, ResultCode::SUCCESS, None)).await;
    waiting.await.unwrap().unwrap();
    assert_eq!(client.bind_state(), BindState::SimpleBound { dn: "cn=next".to_owned() });
}

#[tokio::test]
async fn sasl_bind_records_negotiated_properties() {
    let (conn, mut server) = pair();
    let client = client_over(conn);
    let c = client.clone();
    let binding = tokio::spawn(async move {
        let mut mech = TwoStep { rounds: 0, done: false };
        c.sasl_bind(&mut mech).await
    });
    let first = server.recv().await;
    server
        .send(bind_response(first.id, ResultCode::SASL_BIND_IN_PROGRESS, Some(b"c1")))
        .await;
    let second = server.recv().await;
    server.send(bind_response(second.id, ResultCode::SUCCESS, None)).await;
    binding.await.unwrap().unwrap();

    assert_eq!(
        client.bind_state(),
        BindState::SaslBound {
            mechanism: "X-TWO-STEP".to_owned(),
            props: BTreeMap::from([("rounds".to_owned(), "2".to_owned())]),
        }
    );
}

/// Sends a greeting and accepts only "proof" as the server's final answer.
struct Mutual {
    greeted: bool,
}

impl SaslClient for Mutual {
    fn mechanism_name(&self) -> &str {
        "X-MUTUAL"
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> lds_client::Result<Vec<u8>> {
        if !self.greeted {
            self.greeted = true;
            return Ok(b"hi".to_vec());
        }
        if challenge == b"proof" {
            Ok(Vec::new())
        } else {
            Err(LdapError::Sasl("server proof rejected".to_owned()))
        }
    }

    fn is_complete(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn rejected_server_proof_leaves_connection_anonymous() {
    let (conn, mut server) = pair();
    let client = client_over(conn);
    let c = client.clone();
    let binding = tokio::spawn(async move {
        let mut mech = Mutual { greeted: false };
        c.sasl_bind(&mut mech).await
    });

    let req = server.recv().await;
    assert_eq!(sasl_credentials(&req), ("X-MUTUAL".to_owned(), Some(b"hi".to_vec())));
    server
        .send(bind_response(req.id, ResultCode::SUCCESS, Some(b"forged")))
        .await;

    assert!(matches!(binding.await.unwrap(), Err(LdapError::Sasl(_))));
    assert_eq!(client.bind_state(), BindState::Anonymous);
    assert_eq!(client.connection().agent().pending_count(), 0);

    // the bind permit is free again
    let c = client.clone();
    let next = tokio::spawn(async move { c.simple_bind("cn=next", "pw").await });
    let req = server.recv().await;
    server.send(bind_response(req.id, ResultCode::SUCCESS, None)).await;
    next.await.unwrap().unwrap();
}
