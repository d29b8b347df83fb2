use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use storage_platform::grants::{GrantFlags, GrantTable, UriPermission};

use crate::now_millis;

/// Serializable contents of a [`MemoryGrantTable`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantState {
    /// Session grants handed out by pickers; only these can be persisted
    transient: BTreeMap<String, GrantFlags>,
    persisted: Vec<UriPermission>,
}

/// Persisted URI permission table.
///
/// Like the platform, a grant can only be persisted if the app already holds it
/// transiently (see [`MemoryGrantTable::grant_transient`]).
pub struct MemoryGrantTable {
    state: Mutex<GrantState>,
}

impl MemoryGrantTable {
    pub fn new() -> Self {
        Self::with_state(GrantState::default())
    }

    pub fn with_state(state: GrantState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> Result<GrantState> {
        Ok(self.lock()?.clone())
    }

    /// Record a session grant, as a picker does when the user selects an entry
    pub fn grant_transient(&self, uri: &str, flags: GrantFlags) -> Result<()> {
        let mut state = self.lock()?;
        let held = state.transient.entry(uri.to_string()).or_default();
        held.read |= flags.read;
        held.write |= flags.write;
        Ok(())
    }

    /// Drop every persisted grant for `uri`, as the OS does when the target disappears
    pub fn revoke(&self, uri: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.persisted.retain(|p| p.uri != uri);
        state.transient.remove(uri);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, GrantState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("grant table state poisoned"))
    }
}

impl Default for MemoryGrantTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GrantTable for MemoryGrantTable {
    fn persisted_permissions(&self) -> Result<Vec<UriPermission>> {
        Ok(self.lock()?.persisted.clone())
    }

    fn take_persistable(&self, uri: &str, flags: GrantFlags) -> Result<()> {
        let mut state = self.lock()?;
        let held = state.transient.get(uri).copied().unwrap_or_default();
        if !held.contains(flags) {
            bail!("no transient grant {:?} held for {}", flags, uri);
        }

        match state.persisted.iter_mut().find(|p| p.uri == uri) {
            Some(existing) => {
                existing.read |= flags.read;
                existing.write |= flags.write;
            }
            None => state.persisted.push(UriPermission {
                uri: uri.to_string(),
                read: flags.read,
                write: flags.write,
                persisted_time: now_millis(),
            }),
        }
        debug!("persisted {:?} for {}", flags, uri);
        Ok(())
    }

    fn release_persistable(&self, uri: &str, flags: GrantFlags) -> Result<()> {
        let mut state = self.lock()?;
        let index = state
            .persisted
            .iter()
            .position(|p| p.uri == uri)
            .ok_or_else(|| anyhow!("no persisted grant for {}", uri))?;

        let existing = &mut state.persisted[index];
        if !existing.flags().contains(flags) {
            bail!("grant for {} does not hold {:?}", uri, flags);
        }
        existing.read &= !flags.read;
        existing.write &= !flags.write;
        if existing.flags().is_empty() {
            state.persisted.remove(index);
        }
        debug!("released {:?} for {}", flags, uri);
        Ok(())
    }
}
