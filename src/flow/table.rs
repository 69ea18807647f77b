//! Flow table
//!
//! Keyed map of in-use flow nodes. The table is owned by a single thread;
//! when sharded across cores each shard is a private table and flows are
//! dispatched by hash of key, so per-key ordering still holds.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::node::{FlowKey, FlowNode};

#[derive(Debug, Default)]
pub struct FlowTable {
    nodes: HashMap<FlowKey, FlowNode>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-return-existing in one operation
    ///
    /// Returns `None` when the candidate was inserted as a new flow. When the
    /// key already exists the candidate is handed back to serve as the update
    /// delta, and the stored node is reachable via [`get_mut`](Self::get_mut).
    pub fn insert_or_get(&mut self, candidate: FlowNode) -> Option<FlowNode> {
        match self.nodes.entry(*candidate.key()) {
            Entry::Vacant(e) => {
                e.insert(candidate);
                None
            }
            Entry::Occupied(e) => {
                debug_assert_eq!(e.get().key(), candidate.key());
                Some(candidate)
            }
        }
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowNode> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut FlowNode> {
        self.nodes.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Cross-link the flow with its opposite direction, if present
    ///
    /// Both directions are linked in the same operation so the symmetry
    /// invariant holds. Returns whether a new link was formed. A flow whose
    /// key is its own reverse never links to itself.
    pub fn link_reverse(&mut self, key: &FlowKey) -> bool {
        let rev = key.reverse();
        if rev == *key {
            return false;
        }
        match self.nodes.get(key) {
            Some(node) if node.reverse.is_none() => {}
            _ => return false,
        }
        match self.nodes.get(&rev) {
            Some(peer) if peer.reverse.is_none() => {}
            _ => return false,
        }
        if let Some(peer) = self.nodes.get_mut(&rev) {
            peer.reverse = Some(*key);
        }
        if let Some(node) = self.nodes.get_mut(key) {
            node.reverse = Some(rev);
        }
        true
    }

    /// Remove a node, clearing the peer's back-reference
    pub fn remove(&mut self, key: &FlowKey) -> Option<FlowNode> {
        let node = self.nodes.remove(key)?;
        if let Some(peer_key) = node.reverse {
            if let Some(peer) = self.nodes.get_mut(&peer_key) {
                peer.reverse = None;
            }
        }
        Some(node)
    }

    /// Remove and return every node idle longer than `timeout_us`
    pub fn expire_idle(&mut self, now_us: u64, timeout_us: u64) -> Vec<FlowNode> {
        let expired: Vec<FlowKey> = self
            .nodes
            .values()
            .filter(|n| now_us.saturating_sub(n.t_last) > timeout_us)
            .map(|n| *n.key())
            .collect();
        expired.iter().filter_map(|k| self.remove(k)).collect()
    }

    /// Remove and return everything (shutdown path)
    pub fn drain(&mut self) -> Vec<FlowNode> {
        let keys: Vec<FlowKey> = self.nodes.keys().copied().collect();
        keys.iter().filter_map(|k| self.remove(k)).collect()
    }
}
