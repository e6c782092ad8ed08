use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::agent::MessageAgent;
use crate::error::{LdapError, Result};
use crate::ldap::{Message, MessageParams};
use crate::registry::NOTICE_OF_DISCONNECTION_OID;
use crate::tokiou::DecodeContext;

const WRITE_QUEUE: usize = 1024;

struct WriteRequest {
    pdu: Vec<u8>,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Owns the stream through one reader task and one writer task.
pub struct Transport {
    writer: mpsc::Sender<WriteRequest>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Transport {
    pub fn start<S>(stream: S, agent: Arc<MessageAgent>, max_pdu: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (transmit_tx, mut transmit_rx) = mpsc::channel::<WriteRequest>(WRITE_QUEUE);
        let conn = agent.id();

        let writer_agent = agent.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(req) = transmit_rx.recv().await {
                let res = match writer.write_all(&req.pdu).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                let failed = match &res {
                    Ok(()) => {
                        trace!(conn, bytes = req.pdu.len(), "sent");
                        None
                    }
                    Err(e) => Some(e.to_string()),
                };
                let _ = req.ack.send(res);
                if let Some(reason) = failed {
                    warn!(conn, error = %reason, "write failed");
                    writer_agent.fail_all(&reason);
                    break;
                }
            }
            let _ = writer.shutdown().await;
            debug!(conn, "writer finished");
        });

        let reader_task = tokio::spawn(async move {
            let mut decode_context = DecodeContext::with_max_pdu(max_pdu);
            let reason = loop {
                match decode_context.get_message(&mut reader).await {
                    Ok(msg) => {
                        if msg.id == 0 {
                            log_unsolicited(conn, &msg);
                        }
                        agent.dispatch(msg);
                    }
                    Err(LdapError::ConnectionLost(reason)) => {
                        debug!(conn, %reason, "reader finished");
                        break reason;
                    }
                    Err(e) => {
                        warn!(conn, error = %e, "reader failed");
                        break e.to_string();
                    }
                }
            };
            agent.fail_all(&reason);
        });

        Self {
            writer: transmit_tx,
            reader_task,
            writer_task,
        }
    }

    /// Queues one encoded PDU and waits for it to reach the stream.
    pub async fn write(&self, pdu: Vec<u8>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.writer
            .send(WriteRequest { pdu, ack })
            .await
            .map_err(|_| LdapError::ConnectionLost("writer is gone".to_owned()))?;
        done.await
            .map_err(|_| LdapError::ConnectionLost("writer is gone".to_owned()))??;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed() || self.reader_task.is_finished()
    }

    pub fn shutdown(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn log_unsolicited(conn: u64, msg: &Message) {
    match &msg.params {
        MessageParams::ExtendedResponse(r)
            if r.name.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) =>
        {
            info!(conn, code = %r.result.code, diag = %r.result.diag, "server sent notice of disconnection");
        }
        other => debug!(conn, kind = ?other.message_type(), "unsolicited message"),
    }
}
