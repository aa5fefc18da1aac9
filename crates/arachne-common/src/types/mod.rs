//! Identifier types and the dynamic property value.
//!
//! Identifiers are `#[repr(transparent)]` newtypes over integers so that
//! mixing up a transaction id and a vertex id is a compile error, not a
//! 3 a.m. debugging session.

mod value;

pub use value::Value;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a transaction.
///
/// Assigned by the transaction engine, strictly increasing for the
/// lifetime of a coordinator. `TxId(0)` is the pre-history stamp used
/// for entities loaded from a snapshot; it is treated as committed
/// before every transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
pub struct TxId(pub u64);

impl TxId {
    /// Stamp for entities that predate every live transaction
    /// (snapshot loads, recovery).
    pub const PRE_HISTORY: Self = Self(0);

    /// Creates a new TxId from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command counter within a transaction.
///
/// Separates the effects of consecutive statements: a version created at
/// command `c` only becomes visible to its own transaction once the
/// command counter has advanced past `c`.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[repr(transparent)]
pub struct CommandId(pub u64);

impl CommandId {
    /// The command counter every transaction starts at.
    pub const FIRST: Self = Self(1);

    /// Creates a new CommandId from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Worker identifier within the cluster. `0` is the coordinator.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[repr(transparent)]
pub struct WorkerId(pub u16);

impl WorkerId {
    /// The coordinator's worker id.
    pub const COORDINATOR: Self = Self(0);

    /// Creates a new WorkerId.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identifier of a vertex or edge, unique within one worker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
pub struct Gid(pub u64);

impl Gid {
    /// Creates a new Gid from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gid({})", self.0)
    }
}

/// Cluster-wide entity address: which worker owns it, and its local id.
///
/// The pair is unique across the cluster; accessors and remote-pull
/// responses refer to entities exclusively by address.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
pub struct GlobalAddress {
    /// Owning worker.
    pub worker: WorkerId,
    /// Identifier local to that worker.
    pub gid: Gid,
}

impl GlobalAddress {
    /// Creates an address from its parts.
    #[inline]
    #[must_use]
    pub const fn new(worker: WorkerId, gid: Gid) -> Self {
        Self { worker, gid }
    }

    /// Returns `true` when the address belongs to the given worker.
    #[inline]
    #[must_use]
    pub const fn is_local_to(self, worker: WorkerId) -> bool {
        self.worker.0 == worker.0
    }
}

impl fmt::Display for GlobalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.worker.0, self.gid.0)
    }
}

/// Interned label identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[repr(transparent)]
pub struct LabelId(pub u32);

/// Interned edge-type identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[repr(transparent)]
pub struct EdgeTypeId(pub u32);

/// Interned property-name identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, Debug,
)]
#[repr(transparent)]
pub struct PropertyId(pub u32);

/// The set of transactions that were active when a transaction began.
///
/// Everything in the snapshot is invisible to the owning transaction,
/// regardless of later commits. Kept sorted so membership checks are a
/// binary search and the minimum is `first()`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub struct Snapshot(Vec<TxId>);

impl Snapshot {
    /// Creates an empty snapshot (nothing was active).
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Builds a snapshot from active transaction ids, sorting them.
    #[must_use]
    pub fn from_ids(mut ids: Vec<TxId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    /// Returns `true` when the given transaction was active at begin time.
    #[must_use]
    pub fn contains(&self, id: TxId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// The smallest member, if any.
    #[must_use]
    pub fn first(&self) -> Option<TxId> {
        self.0.first().copied()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when nothing was active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = TxId> + '_ {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_membership() {
        let snap = Snapshot::from_ids(vec![TxId(7), TxId(3), TxId(3), TxId(11)]);
        assert!(snap.contains(TxId(3)));
        assert!(snap.contains(TxId(7)));
        assert!(snap.contains(TxId(11)));
        assert!(!snap.contains(TxId(4)));
        assert_eq!(snap.first(), Some(TxId(3)));
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn empty_snapshot() {
        let snap = Snapshot::empty();
        assert!(snap.is_empty());
        assert_eq!(snap.first(), None);
        assert!(!snap.contains(TxId(1)));
    }

    #[test]
    fn global_address_locality() {
        let addr = GlobalAddress::new(WorkerId(2), Gid(9));
        assert!(addr.is_local_to(WorkerId(2)));
        assert!(!addr.is_local_to(WorkerId::COORDINATOR));
        assert_eq!(addr.to_string(), "2:9");
    }
}
