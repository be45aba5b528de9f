//! Static cluster membership

use std::collections::BTreeSet;

use crate::ballot::PeerId;

/// Source of the peers every proposer broadcasts to.
pub trait Membership: Send + Sync + 'static {
    /// Ordered set of peer addresses.
    fn members(&self) -> &[PeerId];

    fn len(&self) -> usize {
        self.members().len()
    }

    fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    fn contains(&self, peer: &PeerId) -> bool {
        self.members().contains(peer)
    }
}

/// Membership fixed for the lifetime of the process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticMembership {
    members: Vec<PeerId>,
}

impl StaticMembership {
    /// Build from any list of peers; duplicates are dropped and the result is sorted.
    pub fn new(members: impl IntoIterator<Item = PeerId>) -> Self {
        let members: BTreeSet<PeerId> = members.into_iter().collect();
        Self {
            members: members.into_iter().collect(),
        }
    }
}

impl Membership for StaticMembership {
    fn members(&self) -> &[PeerId] {
        &self.members
    }
}

impl<P: Into<PeerId>> FromIterator<P> for StaticMembership {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_sorted_and_deduplicated() {
        let membership: StaticMembership = ["c", "a", "b", "a"].into_iter().collect();
        let names: Vec<_> = membership.members().iter().map(PeerId::as_str).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(membership.len(), 3);
        assert!(membership.contains(&PeerId::new("b")));
        assert!(!membership.contains(&PeerId::new("d")));
    }
}
