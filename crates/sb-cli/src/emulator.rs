//! File-backed in-memory namespace used by the binary.
//!
//! The state file is guarded by an exclusive `fs2` lock on a sibling
//! `<state>.lock` file, held from load until the emulator is dropped. A
//! second `sbctl` on the same state file fails instead of overwriting the
//! first one's changes on exit.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use sb_core::adapters::memory::NamespaceSnapshot;
use sb_core::{BrokerConnector, ConnectionString, InMemoryConnector, InMemoryNamespace};
use tracing::{debug, info, warn};

/// Exclusive lock on a state file, released on drop.
struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    fn acquire(state: &Path) -> Result<Self> {
        let mut name = state.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = std::fs::read_to_string(&path).unwrap_or_default();
            match holder.trim().parse::<u32>() {
                Ok(pid) => bail!(
                    "emulator state {} is in use by another sbctl process (pid {pid}); \
                     wait for it to exit",
                    state.display()
                ),
                Err(_) => bail!(
                    "emulator state {} is in use by another sbctl process; wait for it to exit",
                    state.display()
                ),
            }
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("writing lock file {}", path.display()))?;
        debug!(path = %path.display(), "State lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Releasing state lock failed");
        }
    }
}

/// One namespace loaded from, and saved back to, a state file.
pub struct Emulator {
    path: PathBuf,
    namespace: InMemoryNamespace,
    connector: Arc<InMemoryConnector>,
    _lock: StateLock,
}

impl Emulator {
    /// Lock `path`, then load it if it exists, otherwise start an empty
    /// namespace. Fails fast while another process holds the lock.
    pub fn open(path: &Path, connection: &ConnectionString) -> Result<Self> {
        let lock = StateLock::acquire(path)?;
        let snapshot = NamespaceSnapshot::load(path)
            .with_context(|| format!("reading emulator state {}", path.display()))?;

        let namespace = match snapshot {
            Some(snapshot) => {
                let restored = InMemoryNamespace::restore(snapshot)
                    .with_context(|| format!("restoring emulator state {}", path.display()))?;
                info!(path = %path.display(), "Emulator state loaded");
                restored
            }
            None => {
                debug!(path = %path.display(), "No emulator state, starting empty");
                InMemoryNamespace::new(connection.namespace.clone())
            }
        };

        let connector = Arc::new(InMemoryConnector::new());
        connector.insert(connection, namespace.clone());
        Ok(Self {
            path: path.to_path_buf(),
            namespace,
            connector,
            _lock: lock,
        })
    }

    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        self.connector.clone()
    }

    pub fn save(&self) -> Result<()> {
        self.namespace
            .snapshot()
            .save(&self.path)
            .with_context(|| format!("writing emulator state {}", self.path.display()))?;
        debug!(path = %self.path.display(), "Emulator state saved");
        Ok(())
    }
}
