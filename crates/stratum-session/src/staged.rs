//! Transaction-staged collection contents.
//!
//! A transaction holds a staged copy of each collection it touches,
//! separate from the committed contents on the object. Reads inside the
//! owning transaction see the staged view; other transactions keep
//! seeing the committed view until flush merges the two.

use stratum_core::Identity;

/// A member handle in a staged collection.
///
/// Members without an identity yet (transient instances whose insert has
/// not been applied) are tracked by their object handle and resolved to
/// an identity at flush time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKey {
    /// A member with a known identity.
    Id(Identity),
    /// A transient member, tracked by object handle until its insert
    /// assigns an identity.
    Pending(u64),
}

/// Committed contents plus the transaction's staged view.
#[derive(Debug, Clone, Default)]
pub struct StagedCollection {
    committed: Vec<Identity>,
    staged: Vec<MemberKey>,
}

impl StagedCollection {
    /// Stage a collection starting from its committed contents.
    pub fn new(committed: Vec<Identity>) -> Self {
        let staged = committed.iter().cloned().map(MemberKey::Id).collect();
        Self { committed, staged }
    }

    /// The committed contents.
    pub fn committed(&self) -> &[Identity] {
        &self.committed
    }

    /// The staged view.
    pub fn staged(&self) -> &[MemberKey] {
        &self.staged
    }

    /// Append a member if not already present. Returns whether the view
    /// changed.
    pub fn add(&mut self, member: MemberKey) -> bool {
        if self.staged.contains(&member) {
            return false;
        }
        self.staged.push(member);
        true
    }

    /// Remove a member. Returns whether the view changed.
    pub fn remove(&mut self, member: &MemberKey) -> bool {
        let before = self.staged.len();
        self.staged.retain(|m| m != member);
        self.staged.len() != before
    }

    /// Whether the staged view differs from the committed contents.
    pub fn is_dirty(&self) -> bool {
        if self.staged.len() != self.committed.len() {
            return true;
        }
        self.staged
            .iter()
            .zip(&self.committed)
            .any(|(s, c)| !matches!(s, MemberKey::Id(id) if id == c))
    }

    /// Members present in the staged view but not committed, and
    /// committed members absent from the staged view.
    pub fn diff(&self) -> (Vec<MemberKey>, Vec<Identity>) {
        let inserted = self
            .staged
            .iter()
            .filter(|m| !matches!(m, MemberKey::Id(id) if self.committed.contains(id)))
            .cloned()
            .collect();
        let removed = self
            .committed
            .iter()
            .filter(|id| {
                !self
                    .staged
                    .iter()
                    .any(|m| matches!(m, MemberKey::Id(mid) if mid == *id))
            })
            .cloned()
            .collect();
        (inserted, removed)
    }

    /// Replace the committed contents with the resolved staged view
    /// after a successful flush.
    pub fn merge_committed(&mut self, resolved: Vec<Identity>) {
        self.staged = resolved.iter().cloned().map(MemberKey::Id).collect();
        self.committed = resolved;
    }

    /// Discard staged changes, restoring the committed view.
    pub fn cancel(&mut self) {
        self.staged = self.committed.iter().cloned().map(MemberKey::Id).collect();
    }
}
