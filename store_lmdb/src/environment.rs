//! LMDB environment setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::info;

use crate::ledger::LmdbLedgerStore;
use crate::LmdbError;

/// Name of the single database holding all ledger keys.
const LEDGER_DB: &str = "ledger";

/// Wraps the LMDB environment and its database handles.
pub struct LmdbEnvironment {
    env: Arc<Env>,
    ledger_db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path.
    ///
    /// `map_size` is the maximum size of the memory map in bytes and must be
    /// a multiple of the OS page size.
    pub fn open(path: &Path, max_dbs: u32, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per path within this process;
        // callers must not open the same path twice concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_dbs)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let ledger_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(LEDGER_DB))?;
        wtxn.commit()?;

        info!(path = %path.display(), map_size, "opened LMDB environment");

        Ok(Self {
            env: Arc::new(env),
            ledger_db,
            path: path.to_path_buf(),
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The ledger key-value store backed by this environment.
    pub fn ledger_store(&self) -> LmdbLedgerStore {
        LmdbLedgerStore {
            env: Arc::clone(&self.env),
            ledger_db: self.ledger_db,
        }
    }
}
