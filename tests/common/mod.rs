#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};

use lds_client::codec;
use lds_client::ldap::{
    LdapResult, Message, MessageParams, MsgBindResponse, MsgExtendedResponse,
    MsgSearchResultEntry, PartialAttribute, ResultCode,
};
use lds_client::tokiou::DecodeContext;
use lds_client::url::LdapUrl;
use lds_client::{BoxFuture, Connection, Connector, LdapConfig, LdapError, Result};

/// Server end of an in-memory connection, driven step by step by the test.
pub struct ScriptedServer {
    io: DuplexStream,
    ctx: DecodeContext,
}

impl ScriptedServer {
    pub async fn recv(&mut self) -> Message {
        self.ctx.get_message(&mut self.io).await.expect("request")
    }

    /// `None` when nothing arrives within `ms` milliseconds.
    pub async fn recv_within(&mut self, ms: u64) -> Option<Message> {
        tokio::time::timeout(Duration::from_millis(ms), self.ctx.get_message(&mut self.io))
            .await
            .ok()
            .map(|r| r.expect("request"))
    }

    pub async fn send(&mut self, msg: Message) {
        self.io.write_all(&codec::encode(&msg)).await.expect("write");
    }

    pub async fn reply(&mut self, id: i32, params: MessageParams) {
        self.send(Message::new(id, params)).await;
    }
}

pub fn pair() -> (Connection, ScriptedServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (
        Connection::from_stream(client, 1 << 20),
        ScriptedServer {
            io: server,
            ctx: DecodeContext::for_requests(),
        },
    )
}

pub type Handler = Arc<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

type RequestLog = Arc<Mutex<Vec<(String, Message)>>>;

/// Answers every request with `handler` until the client goes away.
fn serve(host: String, io: DuplexStream, handler: Handler, log: RequestLog) {
    tokio::spawn(async move {
        let mut server = ScriptedServer {
            io,
            ctx: DecodeContext::for_requests(),
        };
        while let Ok(req) = server.ctx.get_message(&mut server.io).await {
            log.lock().unwrap().push((host.clone(), req.clone()));
            for resp in handler(&req) {
                if server.io.write_all(&codec::encode(&resp)).await.is_err() {
                    return;
                }
            }
        }
    });
}

/// Connector serving each host name from an in-memory handler.
#[derive(Default)]
pub struct MemoryConnector {
    hosts: Mutex<HashMap<String, Handler>>,
    connects: AtomicUsize,
    requests: RequestLog,
}

impl MemoryConnector {
    pub fn host<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
    {
        self.hosts
            .lock()
            .unwrap()
            .insert(name.to_owned(), Arc::new(handler));
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn requests_to(&self, host: &str) -> Vec<Message> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &LdapUrl, config: &LdapConfig) -> BoxFuture<Result<Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let handler = self.hosts.lock().unwrap().get(&url.host).cloned();
        let host = url.host.clone();
        let log = self.requests.clone();
        let max_pdu = config.max_pdu_size();
        Box::pin(async move {
            let handler = handler.ok_or_else(|| {
                LdapError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, host.clone()))
            })?;
            let (client, server) = tokio::io::duplex(64 * 1024);
            serve(host, server, handler, log);
            Ok(Connection::from_stream(client, max_pdu))
        })
    }
}

pub fn result(code: ResultCode) -> LdapResult {
    LdapResult::new(code)
}

pub fn referral(urls: &[&str]) -> LdapResult {
    LdapResult {
        referrals: urls.iter().map(|u| u.to_string()).collect(),
        ..LdapResult::new(ResultCode::REFERRAL)
    }
}

pub fn entry(id: i32, dn: &str) -> Message {
    Message::new(
        id,
        MessageParams::SearchResultEntry(MsgSearchResultEntry {
            name: dn.to_owned(),
            attributes: vec![PartialAttribute::new("cn", &["x"])],
        }),
    )
}

pub fn done(id: i32, code: ResultCode) -> Message {
    Message::new(id, MessageParams::SearchResultDone(result(code)))
}

pub fn bind_response(id: i32, code: ResultCode, creds: Option<&[u8]>) -> Message {
    Message::new(
        id,
        MessageParams::BindResponse(MsgBindResponse {
            result: result(code),
            server_sasl_creds: creds.map(<[u8]>::to_vec),
        }),
    )
}

/// Success for every request that gets a reply.
pub fn respond_ok(req: &Message) -> Vec<Message> {
    let ok = || result(ResultCode::SUCCESS);
    let params = match &req.params {
        MessageParams::Bind(_) => return vec![bind_response(req.id, ResultCode::SUCCESS, None)],
        MessageParams::Search(_) => return vec![done(req.id, ResultCode::SUCCESS)],
        MessageParams::Modify(_) => MessageParams::ModifyResponse(ok()),
        MessageParams::Add(_) => MessageParams::AddResponse(ok()),
        MessageParams::Delete(_) => MessageParams::DeleteResponse(ok()),
        MessageParams::ModifyDn(_) => MessageParams::ModifyDnResponse(ok()),
        MessageParams::Compare(_) => MessageParams::CompareResponse(result(ResultCode::COMPARE_TRUE)),
        MessageParams::Extended(_) => MessageParams::ExtendedResponse(MsgExtendedResponse {
            result: ok(),
            name: None,
            value: None,
        }),
        _ => return vec![],
    };
    vec![Message::new(req.id, params)]
}
