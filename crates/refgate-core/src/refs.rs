//! Object-database collaborators used by the reference and commit gates.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AuthzError;
use crate::oid::ObjectId;

/// A fully qualified reference name. Borrowed when the requested name was
/// already canonical, owned when resolution had to build a new string.
pub type CanonicalRef<'a> = Cow<'a, str>;

/// Prefixes tried, in order, when expanding a short reference name.
pub const REF_RULES: &[&str] = &["", "refs/", "refs/tags/", "refs/heads/", "refs/remotes/"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: String,
    pub tip: ObjectId,
}

/// Reference tips gathered for one check.
#[derive(Debug, Default)]
pub struct RefList {
    refs: Vec<RefEntry>,
}

impl RefList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RefEntry) {
        self.refs.push(entry);
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RefEntry> {
        self.refs.iter()
    }
}

/// Reference resolution, enumeration and ancestry for one repository.
pub trait RefStore: Send + Sync {
    /// Resolve a possibly-abbreviated name. `None` when nothing matches.
    fn canonicalize<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CanonicalRef<'a>>, AuthzError>> + Send + 'a>>;

    /// Append every local branch (`refs/heads/*`) to `list`.
    fn collect_branch_refs<'a>(
        &'a self,
        list: &'a mut RefList,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>>;

    /// Append every remote-tracking branch (`refs/remotes/*`) to `list`.
    fn collect_remote_refs<'a>(
        &'a self,
        list: &'a mut RefList,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>>;

    /// Whether `commit` is reachable from `tip` (a commit is its own ancestor).
    fn is_ancestor<'a>(
        &'a self,
        commit: &'a ObjectId,
        tip: &'a ObjectId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send + 'a>>;
}

/// A [`RefStore`] over an in-memory commit graph.
#[derive(Debug, Default)]
pub struct MemoryRefStore {
    refs: BTreeMap<String, ObjectId>,
    parents: HashMap<ObjectId, Vec<ObjectId>>,
    ancestry_checks: AtomicUsize,
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference by its full name.
    pub fn with_ref(mut self, name: impl Into<String>, tip: ObjectId) -> Self {
        self.refs.insert(name.into(), tip);
        self
    }

    pub fn with_commit(mut self, id: ObjectId, parents: Vec<ObjectId>) -> Self {
        self.parents.insert(id, parents);
        self
    }

    /// Number of `is_ancestor` calls served so far.
    pub fn ancestry_checks(&self) -> usize {
        self.ancestry_checks.load(Ordering::SeqCst)
    }

    fn collect_prefix(&self, prefix: &str, list: &mut RefList) {
        for (name, tip) in self.refs.range(prefix.to_string()..) {
            if !name.starts_with(prefix) {
                break;
            }
            list.push(RefEntry {
                name: name.clone(),
                tip: tip.clone(),
            });
        }
    }

    fn reachable(&self, commit: &ObjectId, tip: &ObjectId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([tip]);

        while let Some(current) = queue.pop_front() {
            if current == commit {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                queue.extend(parents.iter());
            }
        }
        false
    }
}

impl RefStore for MemoryRefStore {
    fn canonicalize<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CanonicalRef<'a>>, AuthzError>> + Send + 'a>>
    {
        Box::pin(async move {
            if self.refs.contains_key(name) {
                return Ok(Some(Cow::Borrowed(name)));
            }
            let resolved = REF_RULES
                .iter()
                .skip(1)
                .map(|prefix| format!("{prefix}{name}"))
                .find(|candidate| self.refs.contains_key(candidate));
            Ok(resolved.map(Cow::Owned))
        })
    }

    fn collect_branch_refs<'a>(
        &'a self,
        list: &'a mut RefList,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>> {
        Box::pin(async move {
            self.collect_prefix("refs/heads/", list);
            Ok(())
        })
    }

    fn collect_remote_refs<'a>(
        &'a self,
        list: &'a mut RefList,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>> {
        Box::pin(async move {
            self.collect_prefix("refs/remotes/", list);
            Ok(())
        })
    }

    fn is_ancestor<'a>(
        &'a self,
        commit: &'a ObjectId,
        tip: &'a ObjectId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send + 'a>> {
        Box::pin(async move {
            self.ancestry_checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.reachable(commit, tip))
        })
    }
}
