//! Set helpers over namespace and resource names
//!
//! Sets are ordered so a pass visits namespaces in the same lexical order
//! every time.

use std::collections::BTreeSet;

use kube::ResourceExt;

/// Collect names into a set, dropping duplicates
pub fn to_set<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Sorted list of the set's members
pub fn to_list(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

/// Members of either set
pub fn union(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a.union(b).cloned().collect()
}

/// Members of `a` that are not in `b`
pub fn difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a.difference(b).cloned().collect()
}

/// Whether `item` appears in `list`
pub fn contains(list: &[String], item: &str) -> bool {
    list.iter().any(|s| s == item)
}

/// Names of the given resources
pub fn name_set<K: ResourceExt>(resources: &[K]) -> BTreeSet<String> {
    resources.iter().map(ResourceExt::name_any).collect()
}
