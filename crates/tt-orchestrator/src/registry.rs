//! Tunnel registry
//!
//! Pure state: one [`TunnelState`] per tunnel id and the transitions between
//! phases. No I/O. The orchestrator is the only writer and serializes its
//! writes, so each transition here is a single map operation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tt_core::{TunnelId, TunnelPhase, TunnelState};

/// Live state of every named tunnel
pub struct TunnelRegistry {
    tunnels: DashMap<TunnelId, TunnelState>,
}

impl TunnelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tunnels: DashMap::new(),
        }
    }

    /// Get the state for `id`, creating it Idle if absent
    pub fn upsert(&self, id: &TunnelId) -> TunnelState {
        self.tunnels
            .entry(id.clone())
            .or_insert_with(|| TunnelState::idle(id.clone()))
            .clone()
    }

    /// Start an attempt. Returns false if the tunnel is already Connecting.
    pub fn set_connecting(&self, id: &TunnelId) -> bool {
        match self.tunnels.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if state.phase == TunnelPhase::Connecting {
                    return false;
                }
                state.phase = TunnelPhase::Connecting;
                state.local_port = None;
                state.last_error = None;
                true
            }
            Entry::Vacant(entry) => {
                let mut state = TunnelState::idle(id.clone());
                state.phase = TunnelPhase::Connecting;
                entry.insert(state);
                true
            }
        }
    }

    /// Mark a Connecting tunnel Active on `local_port`
    pub fn set_active(&self, id: &TunnelId, local_port: u16) -> bool {
        match self.tunnels.get_mut(id) {
            Some(mut state) if state.phase == TunnelPhase::Connecting => {
                state.phase = TunnelPhase::Active;
                state.local_port = Some(local_port);
                state.last_error = None;
                true
            }
            _ => false,
        }
    }

    /// Mark a Connecting or Active tunnel Failed
    pub fn set_failed(&self, id: &TunnelId, error: impl Into<String>) -> bool {
        match self.tunnels.get_mut(id) {
            Some(mut state)
                if matches!(state.phase, TunnelPhase::Connecting | TunnelPhase::Active) =>
            {
                state.phase = TunnelPhase::Failed;
                state.local_port = None;
                state.last_error = Some(error.into());
                true
            }
            _ => false,
        }
    }

    /// Remove a tunnel, returning its last state
    pub fn remove(&self, id: &TunnelId) -> Option<TunnelState> {
        self.tunnels.remove(id).map(|(_, state)| state)
    }

    /// Get a tunnel's state
    pub fn get(&self, id: &TunnelId) -> Option<TunnelState> {
        self.tunnels.get(id).map(|r| r.clone())
    }

    /// Every Active tunnel, sorted by id
    pub fn all_active(&self) -> Vec<TunnelState> {
        let mut active: Vec<TunnelState> = self
            .tunnels
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.clone())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Every tunnel, sorted by id
    pub fn list(&self) -> Vec<TunnelState> {
        let mut all: Vec<TunnelState> = self.tunnels.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Remove every tunnel, returning what was there
    pub fn clear(&self) -> Vec<TunnelState> {
        let removed = self.list();
        self.tunnels.clear();
        removed
    }

    /// Number of tunnels
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_creates_idle_once() {
        let registry = TunnelRegistry::new();
        let id = TunnelId::control();

        let state = registry.upsert(&id);
        assert_eq!(state.phase, TunnelPhase::Idle);

        registry.set_connecting(&id);
        assert_eq!(registry.upsert(&id).phase, TunnelPhase::Connecting);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_connecting_is_rejected() {
        let registry = TunnelRegistry::new();
        let id = TunnelId::control();

        assert!(registry.set_connecting(&id));
        assert!(!registry.set_connecting(&id));
    }

    #[test]
    fn test_full_lifecycle() {
        let registry = TunnelRegistry::new();
        let id = TunnelId::files();

        assert!(registry.set_connecting(&id));
        assert!(registry.set_active(&id, 27091));
        let state = registry.get(&id).unwrap();
        assert_eq!(state.phase, TunnelPhase::Active);
        assert_eq!(state.local_port, Some(27091));
        assert_eq!(registry.all_active().len(), 1);

        assert!(registry.set_failed(&id, "liveness lapsed"));
        let state = registry.get(&id).unwrap();
        assert_eq!(state.phase, TunnelPhase::Failed);
        assert_eq!(state.local_port, None);
        assert_eq!(state.last_error.as_deref(), Some("liveness lapsed"));
        assert!(registry.all_active().is_empty());

        // A new attempt clears the error
        assert!(registry.set_connecting(&id));
        assert!(registry.get(&id).unwrap().last_error.is_none());
    }

    #[test]
    fn test_invalid_transitions_are_noops() {
        let registry = TunnelRegistry::new();
        let id = TunnelId::control();

        // Unknown id
        assert!(!registry.set_active(&id, 1));
        assert!(!registry.set_failed(&id, "x"));

        // Idle cannot jump to Active or Failed
        registry.upsert(&id);
        assert!(!registry.set_active(&id, 1));
        assert!(!registry.set_failed(&id, "x"));

        // Failed cannot become Active without a new attempt
        registry.set_connecting(&id);
        registry.set_failed(&id, "auth");
        assert!(!registry.set_active(&id, 1));
    }

    #[test]
    fn test_failed_open_never_listed_active() {
        let registry = TunnelRegistry::new();
        registry.set_connecting(&TunnelId::control());
        registry.set_connecting(&TunnelId::files());
        registry.set_active(&TunnelId::control(), 17091);
        registry.set_failed(&TunnelId::files(), "authentication failed");

        let active = registry.all_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, TunnelId::control());
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = TunnelRegistry::new();
        registry.upsert(&TunnelId::control());
        registry.upsert(&TunnelId::files());

        assert!(registry.remove(&TunnelId::control()).is_some());
        assert!(registry.remove(&TunnelId::control()).is_none());
        assert_eq!(registry.clear().len(), 1);
        assert!(registry.is_empty());
    }
}
