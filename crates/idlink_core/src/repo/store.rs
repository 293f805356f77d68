//! Explicit contact store handle with atomic units of work.
//!
//! # Responsibility
//! - Own the SQLite connections backing the contact table.
//! - Lease one connection per unit of work and return it afterwards.
//! - Run units of work inside `BEGIN IMMEDIATE` transactions.
//!
//! # Invariants
//! - A unit of work either commits entirely or leaves no visible mutation.
//! - Writers are totally ordered by SQLite's write lock, taken at `BEGIN`.
//! - A connection goes back to the pool only when no transaction is open on it.

use crate::config::StoreOptions;
use crate::db::{open_db_in_memory_with, open_db_with};
use crate::repo::contact_repo::{RepoResult, SqliteContactRepository};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Shared handle over the contact table.
///
/// `Sync`: one handle may serve many threads at once.
pub struct ContactStore {
    backend: Backend,
    options: StoreOptions,
}

enum Backend {
    /// Single connection; units of work queue on the mutex.
    Memory(Mutex<Connection>),
    File(ConnectionPool),
}

struct ConnectionPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ContactStore {
    /// Opens (creating if needed) a file-backed store.
    ///
    /// One connection is opened eagerly so migrations run before any
    /// concurrent unit of work.
    pub fn open_file(path: impl AsRef<Path>, options: StoreOptions) -> RepoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let first = open_db_with(&path, &options).map_err(|err| {
            error!(
                "event=store_open module=repo status=error mode=file error={}",
                err
            );
            err
        })?;
        info!(
            "event=store_open module=repo status=ok mode=file max_idle={}",
            options.max_idle_connections
        );

        Ok(Self {
            backend: Backend::File(ConnectionPool {
                path,
                idle: Mutex::new(vec![first]),
            }),
            options,
        })
    }

    /// Opens a private in-memory store. Contents vanish with the handle.
    pub fn open_in_memory(options: StoreOptions) -> RepoResult<Self> {
        let conn = open_db_in_memory_with(&options)?;
        info!("event=store_open module=repo status=ok mode=memory");

        Ok(Self {
            backend: Backend::Memory(Mutex::new(conn)),
            options,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Runs `unit` atomically under SQLite's write lock.
    ///
    /// Commits when `unit` returns `Ok`; rolls back on `Err` or panic.
    /// Lock waits are bounded by `StoreOptions::busy_timeout`.
    pub fn with_transaction<T, F>(&self, unit: F) -> RepoResult<T>
    where
        F: FnOnce(&SqliteContactRepository<'_>) -> RepoResult<T>,
    {
        self.run_in_transaction(TransactionBehavior::Immediate, unit)
    }

    /// Runs read-only `unit` against one consistent snapshot.
    pub fn with_snapshot<T, F>(&self, unit: F) -> RepoResult<T>
    where
        F: FnOnce(&SqliteContactRepository<'_>) -> RepoResult<T>,
    {
        self.run_in_transaction(TransactionBehavior::Deferred, unit)
    }

    fn run_in_transaction<T, F>(&self, behavior: TransactionBehavior, unit: F) -> RepoResult<T>
    where
        F: FnOnce(&SqliteContactRepository<'_>) -> RepoResult<T>,
    {
        self.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(behavior)?;
            let value = {
                let repo = SqliteContactRepository::new(&tx);
                unit(&repo)?
            };
            tx.commit()?;
            Ok(value)
        })
    }

    fn with_connection<T, F>(&self, work: F) -> RepoResult<T>
    where
        F: FnOnce(&mut Connection) -> RepoResult<T>,
    {
        match &self.backend {
            Backend::Memory(conn) => {
                // A panicking unit of work already rolled back its transaction.
                let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                work(&mut guard)
            }
            Backend::File(pool) => {
                let mut conn = pool.checkout(&self.options)?;
                let result = work(&mut conn);
                pool.checkin(conn, self.options.max_idle_connections);
                result
            }
        }
    }
}

impl ConnectionPool {
    fn checkout(&self, options: &StoreOptions) -> RepoResult<Connection> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match reused {
            Some(conn) => Ok(conn),
            None => Ok(open_db_with(&self.path, options)?),
        }
    }

    fn checkin(&self, conn: Connection, max_idle: usize) {
        if !conn.is_autocommit() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < max_idle {
            idle.push(conn);
        }
    }
}
