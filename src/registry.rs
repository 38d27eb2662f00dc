//! Name and id index of live workers.
//!
//! The registry maps a database name to its worker's queue, with a secondary `id -> name` index
//! for the flat protocol's numeric fast path. Both maps sit behind one lock and are mutated
//! together, so a name can never be bound to two workers. No I/O happens while the lock is
//! held: queue sends never block, and a worker thread only needs the lock after it has started.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use log::debug;
use parking_lot::Mutex;
use rusqlite::InterruptHandle;

use crate::{
    error::{Error, Result},
    worker::{Command, Queue, QueueError},
};

/// How a caller names a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKey<'a> {
    Name(&'a str),
    Id(u64),
}

impl fmt::Display for ResourceKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Name(name) => write!(f, "{name}"),
            ResourceKey::Id(id) => write!(f, "#{id}"),
        }
    }
}

pub(crate) struct RegistryEntry {
    pub(crate) id: u64,
    pub(crate) queue: Queue,
    pub(crate) interrupt: Option<InterruptHandle>,
    /// Shared with the worker; once set, it runs nothing else.
    pub(crate) stopping: Arc<AtomicBool>,
    pub(crate) thread: JoinHandle<()>,
}

impl RegistryEntry {
    pub(crate) fn new(
        id: u64,
        queue: Queue,
        stopping: Arc<AtomicBool>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            queue,
            interrupt: None,
            stopping,
            thread,
        }
    }
}

/// A command that could not be queued, handed back with the reason.
pub(crate) struct Rejected {
    pub(crate) command: Command,
    pub(crate) error: Error,
}

impl Rejected {
    pub(crate) fn reply(self) {
        self.command.reject(self.error);
    }
}

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, RegistryEntry>,
    by_id: HashMap<u64, String>,
}

impl Entries {
    fn get(&self, key: ResourceKey<'_>) -> Option<&RegistryEntry> {
        match key {
            ResourceKey::Name(name) => self.by_name.get(name),
            ResourceKey::Id(id) => self
                .by_id
                .get(&id)
                .and_then(|name| self.by_name.get(name)),
        }
    }
}

pub struct Registry {
    entries: Mutex<Entries>,
    last_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            last_id: AtomicU64::new(0),
        }
    }

    /// Registers a new worker for `name` unless one exists. `start` receives the freshly
    /// assigned id and runs under the registry lock, so no other caller can observe the name
    /// between the check and the insert.
    pub(crate) fn register<F>(&self, name: &str, start: F) -> Result<u64>
    where
        F: FnOnce(u64) -> Result<RegistryEntry>,
    {
        let mut entries = self.entries.lock();
        if entries.by_name.contains_key(name) {
            return Err(Error::AlreadyOpen(name.to_string()));
        }

        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = start(id)?;
        entries.by_id.insert(id, name.to_string());
        entries.by_name.insert(name.to_string(), entry);
        debug!("registered {name} as #{id}");
        Ok(id)
    }

    /// Queues `command` on the worker for `key`.
    pub(crate) fn send(&self, key: ResourceKey<'_>, command: Command) -> Result<(), Rejected> {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Err(Rejected {
                command,
                error: Error::NotOpen(key.to_string()),
            });
        };

        entry.queue.send(command).map_err(|e| match e {
            QueueError::Full(command) => Rejected {
                command,
                error: Error::QueueFull(key.to_string()),
            },
            QueueError::Disconnected(command) => Rejected {
                command,
                error: Error::QueueUnavailable(key.to_string()),
            },
        })
    }

    /// Removes `name` if it is still bound to worker `id`.
    pub(crate) fn remove(&self, name: &str, id: u64) -> Option<RegistryEntry> {
        let mut entries = self.entries.lock();
        if entries.by_name.get(name).is_none_or(|entry| entry.id != id) {
            return None;
        }
        entries.by_id.remove(&id);
        let removed = entries.by_name.remove(name);
        debug!("deregistered {name} (#{id})");
        removed
    }

    /// Removes every entry, returning them for shutdown.
    pub(crate) fn drain(&self) -> Vec<(String, RegistryEntry)> {
        let mut entries = self.entries.lock();
        entries.by_id.clear();
        entries.by_name.drain().collect()
    }

    pub(crate) fn attach_interrupt(&self, id: u64, interrupt: InterruptHandle) {
        let mut entries = self.entries.lock();
        let Some(name) = entries.by_id.get(&id).cloned() else {
            return;
        };
        if let Some(entry) = entries.by_name.get_mut(&name) {
            entry.interrupt = Some(interrupt);
        }
    }

    pub fn contains(&self, key: ResourceKey<'_>) -> bool {
        self.entries.lock().get(key).is_some()
    }

    pub fn id_of(&self, name: &str) -> Option<u64> {
        self.entries.lock().by_name.get(name).map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
