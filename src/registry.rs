//! String handles for groups and in-flight requests.
//!
//! Script code never sees a substrate token. Groups and requests are handed
//! out as labels like `tclmpi::comm3` or `tclmpi::req7`, minted from counters
//! that are never rewound, so a label is never reused even after the object
//! it named is gone.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use crate::datatype::ElementKind;

/// Label table for groups.
///
/// Lookups work both ways: label to group, and group to label. Registering a
/// group that already has a label returns that label.
#[derive(Debug)]
pub struct CommRegistry<C> {
    namespace: String,
    next: u64,
    by_label: HashMap<String, C>,
    by_comm: HashMap<C, String>,
}

impl<C: Copy + Eq + Hash> CommRegistry<C> {
    /// Create a table holding the three predefined groups.
    pub fn new(namespace: &str, world: C, self_comm: C, null: C) -> Self {
        let mut registry = CommRegistry {
            namespace: namespace.to_string(),
            next: 0,
            by_label: HashMap::new(),
            by_comm: HashMap::new(),
        };
        registry.insert(format!("{namespace}::comm_world"), world);
        registry.insert(format!("{namespace}::comm_self"), self_comm);
        registry.insert(format!("{namespace}::comm_null"), null);
        registry
    }

    fn insert(&mut self, label: String, comm: C) {
        self.by_comm.insert(comm, label.clone());
        self.by_label.insert(label, comm);
    }

    /// Label of `comm`, minting a new one if it has none.
    pub fn register(&mut self, comm: C) -> String {
        if let Some(label) = self.by_comm.get(&comm) {
            return label.clone();
        }
        let label = format!("{}::comm{}", self.namespace, self.next);
        self.next += 1;
        debug!(%label, "registered communicator");
        self.insert(label.clone(), comm);
        label
    }

    /// Group named by `label`.
    pub fn resolve(&self, label: &str) -> Option<C> {
        self.by_label.get(label).copied()
    }

    /// Label currently naming `comm`.
    pub fn label_of(&self, comm: C) -> Option<&str> {
        self.by_comm.get(&comm).map(String::as_str)
    }

    /// Forget `label`. Later lookups of the label or its group fail.
    pub fn remove(&mut self, label: &str) -> Option<C> {
        let comm = self.by_label.remove(label)?;
        self.by_comm.remove(&comm);
        debug!(label, "removed communicator");
        Some(comm)
    }

    /// Number of live entries, the predefined groups included.
    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    /// True if no group is registered.
    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}

/// State of an in-flight request.
#[derive(Debug)]
pub(crate) enum PendingRequest<C, R> {
    /// A send; its buffer lives in the native request.
    Send { native: R },
    /// A receive still waiting for a matching message to size its buffer.
    Unposted {
        kind: ElementKind,
        source: i32,
        tag: i32,
        comm: C,
    },
    /// A receive posted to the substrate with a buffer of the right size.
    Posted { kind: ElementKind, native: R },
}

/// Externally visible phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Non-blocking send
    Send,
    /// Receive with no message matched yet
    Unposted,
    /// Receive with its buffer posted
    Posted,
}

impl<C, R> PendingRequest<C, R> {
    pub(crate) fn phase(&self) -> RequestPhase {
        match self {
            PendingRequest::Send { .. } => RequestPhase::Send,
            PendingRequest::Unposted { .. } => RequestPhase::Unposted,
            PendingRequest::Posted { .. } => RequestPhase::Posted,
        }
    }
}

/// Label table for in-flight requests.
///
/// Every entry is complete when inserted and leaves the table exactly once,
/// through [`take`](Self::take).
#[derive(Debug)]
pub(crate) struct RequestRegistry<C, R> {
    namespace: String,
    next: u64,
    entries: HashMap<String, PendingRequest<C, R>>,
}

impl<C, R> RequestRegistry<C, R> {
    pub(crate) fn new(namespace: &str) -> Self {
        RequestRegistry {
            namespace: namespace.to_string(),
            next: 0,
            entries: HashMap::new(),
        }
    }

    /// Store `entry` under a fresh label.
    pub(crate) fn create(&mut self, entry: PendingRequest<C, R>) -> String {
        let label = format!("{}::req{}", self.namespace, self.next);
        self.next += 1;
        debug!(%label, phase = ?entry.phase(), "created request");
        self.entries.insert(label.clone(), entry);
        label
    }

    pub(crate) fn get(&self, label: &str) -> Option<&PendingRequest<C, R>> {
        self.entries.get(label)
    }

    /// Remove and return the entry for `label`.
    pub(crate) fn take(&mut self, label: &str) -> Option<PendingRequest<C, R>> {
        let entry = self.entries.remove(label)?;
        debug!(label, "removed request");
        Some(entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn comms() -> CommRegistry<u32> {
        CommRegistry::new("tclmpi", 0, 1, 2)
    }

    #[test]
    fn predefined_labels() {
        let reg = comms();
        assert_eq!(reg.resolve("tclmpi::comm_world"), Some(0));
        assert_eq!(reg.resolve("tclmpi::comm_self"), Some(1));
        assert_eq!(reg.resolve("tclmpi::comm_null"), Some(2));
        assert_eq!(reg.label_of(1), Some("tclmpi::comm_self"));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn register_is_idempotent() {
        let mut reg = comms();
        let a = reg.register(7);
        assert_eq!(a, "tclmpi::comm0");
        assert_eq!(reg.register(7), a);
        assert_eq!(reg.register(0), "tclmpi::comm_world");
        assert_eq!(reg.register(8), "tclmpi::comm1");
    }

    #[test]
    fn removed_labels_stay_dead() {
        let mut reg = comms();
        let a = reg.register(7);
        assert_eq!(reg.remove(&a), Some(7));
        assert_eq!(reg.resolve(&a), None);
        assert_eq!(reg.remove(&a), None);
        assert_eq!(reg.label_of(7), None);

        // the same token gets a fresh label
        let b = reg.register(7);
        assert_ne!(a, b);
        assert_eq!(reg.resolve(&b), Some(7));
    }

    #[test]
    fn namespace_is_applied() {
        let mut reg = CommRegistry::new("app", 0u32, 1, 2);
        assert_eq!(reg.resolve("app::comm_world"), Some(0));
        assert_eq!(reg.register(5), "app::comm0");
        assert_eq!(reg.resolve("tclmpi::comm_world"), None);
    }

    #[test]
    fn requests_are_never_relabeled() {
        let mut reg: RequestRegistry<u32, ()> = RequestRegistry::new("tclmpi");
        let a = reg.create(PendingRequest::Send { native: () });
        let b = reg.create(PendingRequest::Unposted {
            kind: ElementKind::Int,
            source: 0,
            tag: 1,
            comm: 0,
        });
        assert_eq!(a, "tclmpi::req0");
        assert_eq!(b, "tclmpi::req1");
        assert_eq!(reg.get(&b).map(PendingRequest::phase), Some(RequestPhase::Unposted));
        assert!(reg.take(&a).is_some());
        assert!(reg.take(&a).is_none());
        assert_eq!(reg.len(), 1);
        let c = reg.create(PendingRequest::Send { native: () });
        assert_eq!(c, "tclmpi::req2");
    }

    proptest! {
        #[test]
        fn labels_are_unique(tokens in proptest::collection::vec(3u32..40, 0..100)) {
            let mut reg = comms();
            let mut seen: HashMap<u32, String> = HashMap::new();
            let mut labels = HashSet::new();
            for token in tokens {
                let label = reg.register(token);
                match seen.get(&token) {
                    Some(previous) => prop_assert_eq!(previous, &label),
                    None => {
                        prop_assert!(labels.insert(label.clone()));
                        seen.insert(token, label);
                    }
                }
            }
        }

        #[test]
        fn request_labels_are_unique(ops in proptest::collection::vec(any::<bool>(), 0..100)) {
            let mut reg: RequestRegistry<u32, ()> = RequestRegistry::new("tclmpi");
            let mut labels = HashSet::new();
            let mut live = Vec::new();
            for create in ops {
                if create || live.is_empty() {
                    let label = reg.create(PendingRequest::Send { native: () });
                    prop_assert!(labels.insert(label.clone()));
                    live.push(label);
                } else if let Some(label) = live.pop() {
                    prop_assert!(reg.take(&label).is_some());
                }
            }
            prop_assert_eq!(reg.len(), live.len());
        }
    }
}
