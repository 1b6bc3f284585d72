//! Network client and interactive command shell.
//!
//! [`DatabaseClient`] implements [`KeyValueDb`] over one TCP connection.
//! Any number of threads may issue requests through the same client; each
//! request gets an id and the caller sleeps until the reply with that id
//! arrives. A background thread reads replies and wakes their callers.

pub mod command;
pub mod runner;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, warn};

use crate::error::DbError;
use crate::protocol::{self, AuthStatus, Message, RequestId, DEFAULT_MAX_FRAME_SIZE};
use crate::store::{Key, KeyValueDb, Value};

pub use command::{Command, CommandError};
pub use runner::{CommandRunner, LoggerReporter, Reporter};

/// Reply bookkeeping shared with the reader thread.
#[derive(Debug)]
struct State {
    next_id: RequestId,
    replies: HashMap<RequestId, Message>,
    auth_reply: Option<AuthStatus>,
    authenticated: bool,
    broken: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    /// Reply waiters sleep on `conditions[id % len]`.
    conditions: Vec<Condvar>,
    auth_replied: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn condition(&self, id: RequestId) -> &Condvar {
        let index = usize::try_from(id).unwrap_or_default() % self.conditions.len();
        &self.conditions[index]
    }

    /// Marks the connection broken and wakes every waiter.
    fn mark_broken(&self) {
        self.lock().broken = true;
        for condition in &self.conditions {
            condition.notify_all();
        }
        self.auth_replied.notify_all();
    }
}

/// A connection to a kvdb server.
pub struct DatabaseClient {
    shared: Arc<Shared>,
    writer: Mutex<BufWriter<TcpStream>>,
    /// Serialises authentication attempts; only one can be in flight.
    auth: Mutex<()>,
    stream: TcpStream,
    peer: SocketAddr,
}

impl DatabaseClient {
    /// Connects to a server and starts the reply reader.
    ///
    /// `n_conditions` is the number of condition variables reply waiters are
    /// spread over.
    ///
    /// # Errors
    ///
    /// Returns an error if `n_conditions` is zero, or if connecting or
    /// starting the reader thread fails.
    pub fn connect(address: impl ToSocketAddrs, n_conditions: usize) -> Result<Self, DbError> {
        if n_conditions == 0 {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "at least one condition is required",
            )));
        }

        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                next_id: 1,
                replies: HashMap::new(),
                auth_reply: None,
                authenticated: false,
                broken: false,
            }),
            conditions: (0..n_conditions).map(|_| Condvar::new()).collect(),
            auth_replied: Condvar::new(),
        });

        let reader = BufReader::new(stream.try_clone()?);
        {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("kvdb-client-reader".to_string())
                .spawn(move || read_loop(&shared, reader))?;
        }

        debug!(%peer, "Connected");
        Ok(Self {
            shared,
            writer: Mutex::new(BufWriter::new(stream.try_clone()?)),
            auth: Mutex::new(()),
            stream,
            peer,
        })
    }

    /// Address of the server.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether a previous authentication succeeded.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.shared.lock().authenticated
    }

    /// Whether the connection failed. A broken client cannot recover.
    #[must_use]
    pub fn is_connection_broken(&self) -> bool {
        self.shared.lock().broken
    }

    /// Logs in as `username`, registering the user if the server does not
    /// know it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the connection
    /// breaks before the server answers.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<AuthStatus, DbError> {
        let _in_flight = self.auth.lock().unwrap_or_else(PoisonError::into_inner);

        self.send(&Message::AuthRequest {
            username: username.to_owned(),
            password: password.to_owned(),
        })?;

        let mut state = self.shared.lock();
        loop {
            if let Some(status) = state.auth_reply.take() {
                if status.is_success() {
                    state.authenticated = true;
                }
                return Ok(status);
            }
            if state.broken {
                return Err(DbError::ConnectionBroken);
            }
            state = self
                .shared
                .auth_replied
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Writes one request. Only a failed write breaks the connection; a
    /// message that cannot be encoded leaves it usable.
    fn send(&self, message: &Message) -> Result<(), DbError> {
        let bytes = protocol::frame(message)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|e| {
                self.shared.mark_broken();
                DbError::Io(e)
            })
    }

    /// Sends the request built by `build` and waits for its reply.
    fn request(&self, build: impl FnOnce(RequestId) -> Message) -> Result<Message, DbError> {
        let id = {
            let mut state = self.shared.lock();
            if state.broken {
                return Err(DbError::ConnectionBroken);
            }
            let id = state.next_id;
            state.next_id = state.next_id.checked_add(1).unwrap_or(1);
            id
        };

        self.send(&build(id))?;

        let condition = self.shared.condition(id);
        let mut state = self.shared.lock();
        loop {
            if let Some(reply) = state.replies.remove(&id) {
                return Ok(reply);
            }
            if state.broken {
                return Err(DbError::ConnectionBroken);
            }
            state = condition.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for DatabaseClient {
    fn drop(&mut self) {
        // Unblocks the reader thread.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl fmt::Display for DatabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseClient({})", self.peer)
    }
}

impl fmt::Debug for DatabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseClient")
            .field("peer", &self.peer)
            .field("conditions", &self.shared.conditions.len())
            .finish_non_exhaustive()
    }
}

fn unexpected(reply: Message) -> DbError {
    match reply {
        Message::ErrorResponse { message, .. } => DbError::Server(message),
        other => DbError::UnexpectedResponse {
            received: other.name(),
        },
    }
}

impl KeyValueDb for DatabaseClient {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError> {
        match self.request(|id| Message::PutRequest {
            id,
            key: key.to_owned(),
            value: value.to_vec(),
        })? {
            Message::PutResponse { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Value>, DbError> {
        match self.request(|id| Message::GetRequest {
            id,
            key: key.to_owned(),
        })? {
            Message::GetResponse { value, .. } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn multi_put(&self, pairs: &HashMap<Key, Value>) -> Result<(), DbError> {
        match self.request(|id| Message::MultiPutRequest {
            id,
            pairs: pairs.clone(),
        })? {
            Message::PutResponse { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn multi_get(&self, keys: &HashSet<Key>) -> Result<HashMap<Key, Value>, DbError> {
        match self.request(|id| Message::MultiGetRequest {
            id,
            keys: keys.clone(),
        })? {
            Message::MultiGetResponse { pairs, .. } => Ok(pairs),
            other => Err(unexpected(other)),
        }
    }

    fn get_when(
        &self,
        key: &str,
        key_cond: &str,
        value_cond: &[u8],
    ) -> Result<Option<Value>, DbError> {
        match self.request(|id| Message::GetWhenRequest {
            id,
            key: key.to_owned(),
            key_cond: key_cond.to_owned(),
            value_cond: value_cond.to_vec(),
        })? {
            Message::GetResponse { value, .. } => Ok(value),
            other => Err(unexpected(other)),
        }
    }
}

/// Routes replies to their waiters until the connection ends.
fn read_loop(shared: &Shared, mut reader: BufReader<TcpStream>) {
    loop {
        let message = match protocol::read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE) {
            Ok(message) => message,
            Err(e) if e.is_eof() => {
                debug!("Server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Connection to server failed");
                break;
            }
        };

        if let Message::AuthResponse { status } = message {
            shared.lock().auth_reply = Some(status);
            shared.auth_replied.notify_all();
        } else if let Some(id) = message.request_id() {
            shared.lock().replies.insert(id, message);
            shared.condition(id).notify_all();
        } else {
            warn!(message = message.name(), "Received request from server");
        }
    }

    shared.mark_broken();
}
