use std::collections::HashMap;

/// Where an interactive element lives: the browser's identifiers plus the
/// css path we can re-locate it by once those expire.
///
/// At least one of `backend_node_id` / `dom_path` is always populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeIdentity {
    /// Accessibility-tree node id, when the element came from the ax walk.
    pub ax_node_id: Option<String>,
    /// The browser's opaque integer for the DOM node.
    pub backend_node_id: Option<i64>,
    /// Css path rooted at `body`, `#id` anchored where possible.
    pub dom_path: String,
    /// Set after navigation until the entry is re-resolved or replaced.
    pub stale: bool,
}

/// Session-scoped map from `@e` refs to node identities.
///
/// Refs are handed out from a counter that only ever moves forward: clearing
/// the map does not reset it, so a ref from a discarded snapshot can never
/// collide with one from the next.
#[derive(Debug, Default)]
pub struct RefRegistry {
    entries: HashMap<String, NodeIdentity>,
    counter: u64,
}

impl RefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an identity and return its freshly minted ref.
    pub fn assign(&mut self, identity: NodeIdentity) -> String {
        self.counter += 1;
        let r = format!("@e{}", self.counter);
        self.entries.insert(r.clone(), identity);
        r
    }

    pub fn get(&self, r: &str) -> Option<&NodeIdentity> {
        self.entries.get(r)
    }

    pub fn get_mut(&mut self, r: &str) -> Option<&mut NodeIdentity> {
        self.entries.get_mut(r)
    }

    /// Flag every entry as stale. Called on successful navigation: the old
    /// refs stay addressable but must re-resolve before use.
    pub fn mark_all_stale(&mut self) {
        for identity in self.entries.values_mut() {
            identity.stale = true;
        }
    }

    /// Drop all entries. The counter is preserved.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop a single entry.
    pub fn free(&mut self, r: &str) {
        self.entries.remove(r);
    }

    /// Iterate over the live entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeIdentity)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Test hook: rewind the counter. Never called outside tests.
    #[doc(hidden)]
    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    /// Find the ref already assigned to an identity, matching by ax id
    /// first, then backend node id, then dom path. Used by ref-preserving
    /// snapshots to keep a stable ref on the same node.
    pub fn find_existing(
        &self,
        ax_node_id: Option<&str>,
        backend_node_id: Option<i64>,
        dom_path: &str,
    ) -> Option<String> {
        if let Some(ax) = ax_node_id {
            if let Some((r, _)) = self
                .entries
                .iter()
                .find(|(_, id)| id.ax_node_id.as_deref() == Some(ax))
            {
                return Some(r.clone());
            }
        }
        if let Some(backend) = backend_node_id {
            if let Some((r, _)) = self
                .entries
                .iter()
                .find(|(_, id)| id.backend_node_id == Some(backend))
            {
                return Some(r.clone());
            }
        }
        if !dom_path.is_empty() {
            if let Some((r, _)) = self.entries.iter().find(|(_, id)| id.dom_path == dom_path) {
                return Some(r.clone());
            }
        }
        None
    }
}
