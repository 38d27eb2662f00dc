//! Command routing and database lifecycle.
//!
//! The [`Dispatcher`] is the submission surface of the crate. Every call returns immediately;
//! completion is delivered on the [`Responder`] passed in, once the owning worker has executed
//! the command. Commands for one database are executed strictly in the order they were
//! submitted; commands for different databases are independent.
//!
//! # Example
//! ```rust
//! use sqlrunner::{Config, Dispatcher, OpenOptions, Responder, SqlStatement, StatementOutcome};
//!
//! let dir = std::env::temp_dir().join("sqlrunner-doc");
//! let dispatcher = Dispatcher::new(Config::new(&dir));
//!
//! let (reply, opened) = Responder::channel();
//! dispatcher.open("doc.db", OpenOptions::default(), reply);
//! opened.recv().unwrap().unwrap();
//!
//! let (reply, done) = Responder::channel();
//! dispatcher.execute_batch("doc.db", vec![SqlStatement::plain("SELECT 1")], reply);
//! assert!(matches!(done.recv().unwrap().unwrap()[0], StatementOutcome::Rows(_)));
//!
//! let (reply, deleted) = Responder::channel();
//! dispatcher.delete("doc.db", None, reply);
//! deleted.recv().unwrap().unwrap();
//! ```
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, error, info, warn};

use crate::{
    codec,
    config::{Config, Locator, OpenOptions},
    engine,
    error::Error,
    registry::{Registry, RegistryEntry, Rejected, ResourceKey},
    statement::{SqlStatement, StatementOutcome},
    worker::{Command, Opened, Queue, ResourceHandle, Responder, Worker},
};

pub struct Dispatcher {
    config: Config,
    locator: Locator,
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        Self {
            locator: Locator::new(&config.data_dir),
            config,
            registry: Arc::new(Registry::new()),
        }
    }

    /// Starts a worker for `name`. The reply carries the assigned id once the connection is
    /// open, or [`Error::OpenFailed`]. Opening a name that is already open is
    /// [`Error::AlreadyOpen`].
    pub fn open(&self, name: &str, options: OpenOptions, reply: Responder<Opened>) {
        let mut reply = Some(reply);
        let path = self.locator.resolve(name, options.location.as_deref());

        let registered = self.registry.register(name, |id| {
            let (queue, receiver) = Queue::new(self.config.queue_capacity);
            let handle = ResourceHandle::new(id, name, options.location.clone());
            let stopping = Arc::new(AtomicBool::new(false));
            let worker = Worker::new(
                handle,
                options,
                path,
                Arc::clone(&self.registry),
                receiver,
                Arc::clone(&stopping),
            );

            let open_reply = reply.take().ok_or(Error::Abandoned)?;
            let thread = worker.spawn(open_reply).map_err(|e| Error::OpenFailed {
                name: name.to_string(),
                reason: format!("couldn't start db thread: {e}"),
            })?;
            Ok(RegistryEntry::new(id, queue, stopping, thread))
        });

        match registered {
            Ok(id) => debug!("opening {name} as #{id}"),
            Err(e) => {
                error!("{e}");
                if let Some(reply) = reply {
                    reply.send(Err(e));
                }
            }
        }
    }

    /// Queues `command` for the database named by `key`. Unknown databases are answered with
    /// [`Error::NotOpen`] straight away.
    pub fn dispatch(&self, key: ResourceKey<'_>, command: Command) {
        if let Err(rejected) = self.registry.send(key, command) {
            warn!("{}", rejected.error);
            rejected.reply();
        }
    }

    pub fn execute_batch(
        &self,
        name: &str,
        statements: Vec<SqlStatement>,
        reply: Responder<Vec<StatementOutcome>>,
    ) {
        self.dispatch(
            ResourceKey::Name(name),
            Command::ExecuteBatch { statements, reply },
        );
    }

    /// Routes a flat protocol frame (`fj:<len>;[<id>,...]`) by the id at the head of its
    /// payload. The reply is the flat result token stream.
    pub fn execute_flat_batch(&self, mut wire: String, reply: Responder<String>) {
        let (id, estimated_length, header_len) = match codec::parse_wire(&wire) {
            Ok(frame) => (
                frame.id,
                frame.estimated_length,
                wire.len() - frame.payload.len(),
            ),
            Err(e) => {
                warn!("{e}");
                reply.send(Err(e.into()));
                return;
            }
        };

        wire.drain(..header_len);
        self.dispatch(
            ResourceKey::Id(id),
            Command::ExecuteFlatBatch {
                payload: wire,
                estimated_length,
                reply,
            },
        );
    }

    /// Closes `name` after everything already queued for it. Closing a database that is not
    /// open succeeds immediately.
    pub fn close(&self, name: &str, reply: Responder<()>) {
        let command = Command::Close {
            also_delete: false,
            reply,
        };
        match self.registry.send(ResourceKey::Name(name), command) {
            Ok(()) => debug!("close queued for {name}"),
            Err(Rejected {
                command: Command::Close { reply, .. },
                error: Error::NotOpen(_),
            }) => reply.send(Ok(())),
            Err(rejected) => rejected.reply(),
        }
    }

    /// Closes and deletes `name`. When it is not open, the file is deleted right here on the
    /// calling thread; `location` is only consulted in that case.
    pub fn delete(&self, name: &str, location: Option<&str>, reply: Responder<()>) {
        let command = Command::Close {
            also_delete: true,
            reply,
        };
        match self.registry.send(ResourceKey::Name(name), command) {
            Ok(()) => debug!("delete queued for {name}"),
            Err(Rejected {
                command: Command::Close { reply, .. },
                error: Error::NotOpen(_),
            }) => {
                let path = self.locator.resolve(name, location);
                let result = engine::delete_database(&path);
                if let Err(e) = &result {
                    error!("{e}");
                }
                reply.send(result);
            }
            Err(rejected) => rejected.reply(),
        }
    }

    pub fn echo(&self, value: String) -> String {
        value
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.registry.contains(ResourceKey::Name(name))
    }

    pub fn id_of(&self, name: &str) -> Option<u64> {
        self.registry.id_of(name)
    }

    pub fn open_count(&self) -> usize {
        self.registry.len()
    }

    /// Force-closes every worker. Each one is flagged first, so whatever it still has queued is
    /// answered with [`Error::NotOpen`] instead of executed; then the running statement is
    /// interrupted, a stop sentinel wakes an idle worker, and the thread is joined.
    pub fn shutdown_all(&self) {
        for (name, entry) in self.registry.drain() {
            info!("stopping database {name}");
            let RegistryEntry {
                queue,
                interrupt,
                stopping,
                thread,
                ..
            } = entry;

            stopping.store(true, Ordering::Release);
            if let Some(interrupt) = interrupt {
                interrupt.interrupt();
            }
            if queue.send(Command::Stop).is_err() {
                debug!("couldn't queue stop for {name}, relying on disconnect");
            }
            drop(queue);

            if thread.join().is_err() {
                error!("db thread for {name} panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
