//! Per-connection reader and writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use super::auth::Session;
use super::transport::{FrameReader, FrameWriter};
use super::DatabaseServer;
use crate::protocol::{AuthStatus, Message, ProtocolResult};
use crate::store::KeyValueDb;

const AUTHENTICATION_REQUIRED: &str = "authentication required";
const SHUTTING_DOWN: &str = "server is shutting down";

/// Serves one client until it disconnects.
pub(super) async fn serve(server: Arc<DatabaseServer>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (replies, outbox) = mpsc::unbounded_channel();

    let writer = tokio::spawn(write_loop(FrameWriter::new(write_half), outbox, peer));

    match read_loop(&server, FrameReader::new(read_half, server.max_frame_size), &replies).await {
        Ok(()) => debug!(%peer, "Connection closed by client"),
        Err(e) if e.is_eof() => debug!(%peer, "Connection closed mid-frame"),
        Err(e) => warn!(%peer, error = %e, "Connection failed"),
    }

    // The writer stops once every in-flight request has dropped its sender.
    drop(replies);
    if let Err(e) = writer.await {
        warn!(%peer, error = %e, "Writer task failed");
    }
}

async fn read_loop(
    server: &Arc<DatabaseServer>,
    mut reader: FrameReader<OwnedReadHalf>,
    replies: &UnboundedSender<Message>,
) -> ProtocolResult<()> {
    let mut session: Option<Session> = None;

    while let Some(message) = reader.read_message().await? {
        trace!(message = message.name(), "Received");

        match message {
            Message::AuthRequest { username, password } => {
                let status = if session.is_some() {
                    AuthStatus::ExistingLogin
                } else {
                    let Some((status, opened)) =
                        authenticate(server, &mut reader, &username, &password).await
                    else {
                        return Ok(());
                    };
                    session = opened;
                    status
                };
                send(replies, Message::AuthResponse { status });
            }

            request => match (request.id(), &session) {
                (Some(_), Some(_)) => dispatch(server, request, replies),
                (Some(id), None) => send(
                    replies,
                    Message::ErrorResponse {
                        request_id: id,
                        message: AUTHENTICATION_REQUIRED.to_string(),
                    },
                ),
                (None, _) => warn!(message = request.name(), "Ignoring unexpected message"),
            },
        }
    }

    Ok(())
}

/// Checks credentials, then waits for a session slot.
///
/// Returns `None` if the client disconnects while waiting, giving up its
/// place in the queue.
async fn authenticate(
    server: &Arc<DatabaseServer>,
    reader: &mut FrameReader<OwnedReadHalf>,
    username: &str,
    password: &str,
) -> Option<(AuthStatus, Option<Session>)> {
    let status = server.users.authenticate(username, password);
    if !status.is_success() {
        debug!(username, "Wrong credentials");
        return Some((status, None));
    }

    let opened = tokio::select! {
        opened = server.sessions.open(username) => opened,
        () = reader.closed() => {
            debug!(username, "Client left while waiting for a session");
            return None;
        }
    };

    Some(match opened {
        Some(session) => {
            debug!(username, new_user = status == AuthStatus::SuccessNewUser, "Authenticated");
            (status, Some(session))
        }
        None => {
            debug!(username, "User already logged in");
            (AuthStatus::ExistingLogin, None)
        }
    })
}

/// Hands a request to the thread pool.
fn dispatch(server: &Arc<DatabaseServer>, request: Message, replies: &UnboundedSender<Message>) {
    // Requests always carry an id; checked by the caller.
    let id = request.id().unwrap_or_default();
    let backend = Arc::clone(&server.backend);
    let job_replies = replies.clone();

    let submitted = server.pool.submit(move || {
        let reply = execute(backend.as_ref(), request);
        if job_replies.send(reply).is_err() {
            trace!("Connection closed before reply was sent");
        }
    });

    if let Err(e) = submitted {
        debug!(error = %e, "Rejecting request");
        send(
            replies,
            Message::ErrorResponse {
                request_id: id,
                message: SHUTTING_DOWN.to_string(),
            },
        );
    }
}

/// Runs a request against the backend and builds its reply.
pub(super) fn execute(db: &dyn KeyValueDb, request: Message) -> Message {
    let id = request.id().unwrap_or_default();
    let result = match request {
        Message::PutRequest { key, value, .. } => db
            .put(&key, &value)
            .map(|()| Message::PutResponse { request_id: id }),
        Message::GetRequest { key, .. } => db
            .get(&key)
            .map(|value| Message::GetResponse { request_id: id, value }),
        Message::MultiPutRequest { pairs, .. } => db
            .multi_put(&pairs)
            .map(|()| Message::PutResponse { request_id: id }),
        Message::MultiGetRequest { keys, .. } => db
            .multi_get(&keys)
            .map(|pairs| Message::MultiGetResponse { request_id: id, pairs }),
        Message::GetWhenRequest {
            key,
            key_cond,
            value_cond,
            ..
        } => db
            .get_when(&key, &key_cond, &value_cond)
            .map(|value| Message::GetResponse { request_id: id, value }),
        other => {
            return Message::ErrorResponse {
                request_id: id,
                message: format!("not a request: {}", other.name()),
            }
        }
    };

    result.unwrap_or_else(|e| Message::ErrorResponse {
        request_id: id,
        message: e.to_string(),
    })
}

fn send(replies: &UnboundedSender<Message>, message: Message) {
    // The receiver lives until this connection's reader returns.
    let _ = replies.send(message);
}

async fn write_loop(
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut outbox: UnboundedReceiver<Message>,
    peer: SocketAddr,
) {
    if let Err(e) = drain(&mut writer, &mut outbox).await {
        if e.is_eof() {
            debug!(%peer, "Client stopped reading");
        } else {
            warn!(%peer, error = %e, "Failed to send reply");
        }
        return;
    }
    if let Err(e) = writer.shutdown().await {
        debug!(%peer, error = %e, "Failed to shut down connection");
    }
}

/// Writes replies as they arrive, flushing whenever the channel runs dry.
async fn drain(
    writer: &mut FrameWriter<OwnedWriteHalf>,
    outbox: &mut UnboundedReceiver<Message>,
) -> ProtocolResult<()> {
    while let Some(message) = outbox.recv().await {
        writer.write_message(&message).await?;
        while let Ok(message) = outbox.try_recv() {
            writer.write_message(&message).await?;
        }
        writer.flush().await?;
    }
    Ok(())
}
