//! Per-database worker thread.
//!
//! A [`Worker`] is the only code allowed to touch its database's connection. It owns the
//! connection and the receiving end of a FIFO command queue, and executes one [`Command`] at a
//! time, replying before it dequeues the next. That gives every database strict submission
//! order, while different databases run on different threads with nothing shared between them
//! but the [`Registry`].
//!
//! # Lifecycle
//!
//! ```text
//! Opening -> Open -> (executing)* -> Closing -> Closed
//! ```
//!
//! - `Opening`: the connection is established exactly once. On failure the worker deregisters,
//!   answers the open request with [`Error::OpenFailed`] and every queued command with
//!   [`Error::NotOpen`], then exits.
//! - `Open`: the consume loop runs until a `Close` or `Stop` arrives.
//! - `Closing`: the connection is closed; on `Close` the worker deregisters, optionally deletes
//!   the file, replies, and fails whatever is still queued behind it.
//!
//! A forced shutdown raises the worker's stop flag before interrupting it. The flag is checked
//! before every dequeued command, so a backlog is failed with [`Error::NotOpen`] instead of
//! being executed.
use std::{
    fmt,
    num::NonZeroUsize,
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, SendError, Sender, SyncSender, TrySendError},
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, trace, warn};

use crate::{
    codec::{self, ResultWriter},
    config::OpenOptions,
    engine::{self, Database, OutcomeCollector},
    error::{Error, Result},
    registry::Registry,
    statement::{SqlStatement, StatementOutcome},
};

/// Reply to a successful `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub id: u64,
}

/// One-shot reply channel carried by every command.
///
/// Sending consumes the responder, so a command can be answered at most once. A responder that
/// is dropped unanswered (a panic while executing, for instance) delivers [`Error::Abandoned`],
/// so it is also answered at least once.
#[derive(Debug)]
pub struct Responder<T> {
    tx: Option<Sender<Result<T>>>,
}

impl<T> Responder<T> {
    pub fn channel() -> (Self, Receiver<Result<T>>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn send(mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            if tx.send(result).is_err() {
                debug!("reply dropped, caller is gone");
            }
        }
    }
}

impl<T> Drop for Responder<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(Error::Abandoned));
        }
    }
}

/// Messages consumed by a worker, strictly in arrival order.
#[derive(Debug)]
pub enum Command {
    ExecuteBatch {
        statements: Vec<SqlStatement>,
        reply: Responder<Vec<StatementOutcome>>,
    },
    /// A flat protocol payload; `estimated_length` only sizes the result buffer.
    ExecuteFlatBatch {
        payload: String,
        estimated_length: usize,
        reply: Responder<String>,
    },
    Close {
        also_delete: bool,
        reply: Responder<()>,
    },
    /// Ends the consume loop without a reply. Used by forced shutdown only.
    Stop,
}

impl Command {
    /// Answers the command with `error` without executing it.
    pub fn reject(self, error: Error) {
        match self {
            Command::ExecuteBatch { reply, .. } => reply.send(Err(error)),
            Command::ExecuteFlatBatch { reply, .. } => reply.send(Err(error)),
            Command::Close { reply, .. } => reply.send(Err(error)),
            Command::Stop => {}
        }
    }
}

/// Sending half of a worker queue.
#[derive(Debug, Clone)]
pub(crate) enum Queue {
    Unbounded(Sender<Command>),
    Bounded(SyncSender<Command>),
}

pub(crate) enum QueueError {
    Full(Command),
    Disconnected(Command),
}

impl Queue {
    pub(crate) fn new(capacity: Option<NonZeroUsize>) -> (Self, Receiver<Command>) {
        match capacity {
            None => {
                let (tx, rx) = mpsc::channel();
                (Queue::Unbounded(tx), rx)
            }
            Some(capacity) => {
                let (tx, rx) = mpsc::sync_channel(capacity.get());
                (Queue::Bounded(tx), rx)
            }
        }
    }

    /// Never blocks: a full bounded queue is reported instead of waited on.
    pub(crate) fn send(&self, command: Command) -> Result<(), QueueError> {
        match self {
            Queue::Unbounded(tx) => tx
                .send(command)
                .map_err(|SendError(command)| QueueError::Disconnected(command)),
            Queue::Bounded(tx) => tx.try_send(command).map_err(|e| match e {
                TrySendError::Full(command) => QueueError::Full(command),
                TrySendError::Disconnected(command) => QueueError::Disconnected(command),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Identity and state of the database a worker serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub id: u64,
    pub name: String,
    pub state: ConnectionState,
    pub location: Option<String>,
}

impl ResourceHandle {
    pub fn new(id: u64, name: &str, location: Option<String>) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: ConnectionState::Opening,
            location,
        }
    }
}

pub(crate) struct Worker {
    handle: ResourceHandle,
    options: OpenOptions,
    path: PathBuf,
    registry: Arc<Registry>,
    receiver: Receiver<Command>,
    stopping: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn new(
        handle: ResourceHandle,
        options: OpenOptions,
        path: PathBuf,
        registry: Arc<Registry>,
        receiver: Receiver<Command>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            handle,
            options,
            path,
            registry,
            receiver,
            stopping,
        }
    }

    /// Starts the worker thread. `open_reply` is answered once the connection is established.
    pub(crate) fn spawn(self, open_reply: Responder<Opened>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("sqlrunner-{}", self.handle.id))
            .spawn(move || self.run(open_reply))
    }

    fn set_state(&mut self, state: ConnectionState) {
        trace!(
            "database {} [{}]: {} -> {}",
            self.handle.name, self.handle.id, self.handle.state, state
        );
        self.handle.state = state;
    }

    fn open(&self) -> Result<Database> {
        let failed = |reason: String| Error::OpenFailed {
            name: self.handle.name.clone(),
            reason,
        };

        if !self.options.read_only {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
            }
        }
        Database::open(&self.path, self.options.read_only).map_err(|e| failed(e.to_string()))
    }

    fn run(mut self, open_reply: Responder<Opened>) {
        let mut db = match self.open() {
            Ok(db) => db,
            Err(e) => {
                error!("{e}, stopping db thread");
                self.registry.remove(&self.handle.name, self.handle.id);
                self.set_state(ConnectionState::Closed);
                open_reply.send(Err(e));
                self.reject_pending();
                return;
            }
        };

        self.registry
            .attach_interrupt(self.handle.id, db.interrupt_handle());
        self.set_state(ConnectionState::Open);
        info!("database {} open with id {}", self.handle.name, self.handle.id);
        open_reply.send(Ok(Opened { id: self.handle.id }));

        let terminal = loop {
            let command = match self.receiver.recv() {
                Ok(command) => command,
                Err(_) => {
                    debug!("queue for {} disconnected", self.handle.name);
                    break None;
                }
            };

            // Set by a forced shutdown: nothing queued may run on the connection any more.
            if self.stopping.load(Ordering::Acquire) {
                command.reject(Error::NotOpen(self.handle.name.clone()));
                break None;
            }

            match command {
                Command::ExecuteBatch { statements, reply } => {
                    self.guarded(|worker| reply.send(Ok(worker.execute_batch(&mut db, statements))));
                }
                Command::ExecuteFlatBatch {
                    payload,
                    estimated_length,
                    reply,
                } => {
                    self.guarded(|_| reply.send(execute_flat_batch(&db, &payload, estimated_length)));
                }
                Command::Close { also_delete, reply } => break Some((also_delete, reply)),
                Command::Stop => break None,
            }
        };

        self.set_state(ConnectionState::Closing);
        let closed = db.close().map_err(|source| Error::CloseFailed {
            name: self.handle.name.clone(),
            source,
        });
        self.set_state(ConnectionState::Closed);

        let Some((also_delete, reply)) = terminal else {
            if let Err(e) = closed {
                warn!("{e}");
            }
            info!("database {} stopped", self.handle.name);
            self.reject_pending();
            return;
        };

        self.registry.remove(&self.handle.name, self.handle.id);
        let result = closed.and_then(|()| {
            if also_delete {
                engine::delete_database(&self.path)
            } else {
                Ok(())
            }
        });
        if let Err(e) = &result {
            error!("{e}");
        } else {
            info!("database {} closed", self.handle.name);
        }
        reply.send(result);
        self.reject_pending();
    }

    /// Runs one command so that a panic inside it cannot take the worker down.
    fn guarded<F: FnOnce(&mut Self)>(&mut self, f: F) {
        if catch_unwind(AssertUnwindSafe(|| f(self))).is_err() {
            error!(
                "unexpected panic while executing on {}, continuing",
                self.handle.name
            );
        }
    }

    fn execute_batch(
        &mut self,
        db: &mut Database,
        statements: Vec<SqlStatement>,
    ) -> Vec<StatementOutcome> {
        let mut collector = OutcomeCollector::default();
        engine::execute_batch(db.connection(), &statements, &mut collector);

        if self.options.commit_workaround_enabled() && is_lone_commit(&statements) {
            match db.reopen() {
                Ok(()) => self
                    .registry
                    .attach_interrupt(self.handle.id, db.interrupt_handle()),
                Err(e) => warn!("commit workaround reopen failed: {e}"),
            }
        }

        collector.finish()
    }

    /// Fails everything left in the queue. Called once the worker is deregistered, so nothing
    /// new can arrive.
    fn reject_pending(&self) {
        for command in self.receiver.try_iter() {
            command.reject(Error::NotOpen(self.handle.name.clone()));
        }
    }
}

fn execute_flat_batch(db: &Database, payload: &str, estimated_length: usize) -> Result<String> {
    let (_, statements) = codec::decode_request(payload)?;
    let mut writer = ResultWriter::new(estimated_length);
    engine::execute_batch(db.connection(), &statements, &mut writer);
    Ok(writer.finish()?)
}

fn is_lone_commit(statements: &[SqlStatement]) -> bool {
    matches!(statements, [only] if only.sql.trim().eq_ignore_ascii_case("COMMIT"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_delivers_once() {
        let (reply, rx) = Responder::<u64>::channel();
        reply.send(Ok(3));

        assert_eq!(rx.recv().unwrap().unwrap(), 3);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn dropped_responder_reports_abandoned() {
        let (reply, rx) = Responder::<()>::channel();
        drop(reply);

        assert!(matches!(rx.recv().unwrap(), Err(Error::Abandoned)));
    }

    #[test]
    fn reject_answers_command() {
        let (reply, rx) = Responder::channel();
        Command::ExecuteBatch {
            statements: vec![],
            reply,
        }
        .reject(Error::NotOpen("a".into()));

        assert!(matches!(rx.recv().unwrap(), Err(Error::NotOpen(name)) if name == "a"));
    }

    #[test]
    fn bounded_queue_reports_full() {
        let (queue, _rx) = Queue::new(Some(NonZeroUsize::MIN));
        assert!(queue.send(Command::Stop).is_ok());
        assert!(matches!(queue.send(Command::Stop), Err(QueueError::Full(_))));
    }

    #[test]
    fn queue_without_receiver_is_disconnected() {
        let (queue, rx) = Queue::new(None);
        drop(rx);
        assert!(matches!(
            queue.send(Command::Stop),
            Err(QueueError::Disconnected(_))
        ));
    }

    #[test]
    fn lone_commit_detection() {
        assert!(is_lone_commit(&[SqlStatement::plain(" commit ")]));
        assert!(!is_lone_commit(&[
            SqlStatement::plain("COMMIT"),
            SqlStatement::plain("SELECT 1")
        ]));
        assert!(!is_lone_commit(&[SqlStatement::plain("BEGIN")]));
    }
}
