//! Inheritance graph over resolved policies and level-ordered upload batches.
//!
//! Each policy has at most one outgoing edge (child → parent), so the graph
//! is a forest rooted at parentless policies. Batches are its breadth-first
//! levels: batch 0 holds every root, batch `k` every policy whose parent sits
//! in batch `k - 1`. Policies in one batch never depend on each other.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use tracing::debug;

use crate::policy::document::PolicyDocument;
use crate::policy::error::{PolicyError, PolicyResult};
use crate::policy::read_policies;

/// Parent/child graph of one environment's resolved policies, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct PolicyTree {
    nodes: BTreeMap<String, PolicyDocument>,
    /// `parent_id → {child_id, ...}`
    children: BTreeMap<String, BTreeSet<String>>,
}

impl PolicyTree {
    /// Parse every resolved policy under `dir` and build the graph.
    pub fn read(dir: impl AsRef<Path>) -> PolicyResult<Self> {
        let dir = dir.as_ref();
        let tree = Self::from_documents(read_policies(dir)?)?;
        debug!(dir = %dir.display(), policies = tree.len(), "built policy tree");
        Ok(tree)
    }

    /// Build the graph from already-parsed documents.
    ///
    /// Fails on duplicate ids, on a parent id that matches no document, and on
    /// a parent cycle.
    pub fn from_documents(documents: Vec<PolicyDocument>) -> PolicyResult<Self> {
        let mut nodes: BTreeMap<String, PolicyDocument> = BTreeMap::new();
        for doc in documents {
            if let Some(existing) = nodes.get(doc.id()) {
                return Err(PolicyError::DuplicatePolicyId {
                    policy_id: doc.id().to_string(),
                    first: existing.source().to_path_buf(),
                    second: doc.source().to_path_buf(),
                });
            }
            nodes.insert(doc.id().to_string(), doc);
        }

        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, doc) in &nodes {
            if let Some(parent) = doc.parent_id() {
                if !nodes.contains_key(parent) {
                    return Err(PolicyError::DanglingParent {
                        policy_id: id.clone(),
                        parent_id: parent.to_string(),
                    });
                }
                children
                    .entry(parent.to_string())
                    .or_default()
                    .insert(id.clone());
            }
        }

        let tree = Self { nodes, children };
        tree.check_acyclic()?;
        Ok(tree)
    }

    /// Walk each parent chain with a visited set; revisiting a policy on the
    /// current chain is a cycle. Chains already proven to reach a root are
    /// not walked again.
    fn check_acyclic(&self) -> PolicyResult<()> {
        let mut rooted: HashSet<&str> = HashSet::new();

        for start in self.nodes.keys() {
            let mut chain: Vec<&str> = Vec::new();
            let mut on_chain: HashSet<&str> = HashSet::new();
            let mut current = Some(start.as_str());

            while let Some(id) = current {
                if rooted.contains(id) {
                    break;
                }
                if !on_chain.insert(id) {
                    let cycle_start = chain.iter().position(|c| *c == id).unwrap_or(0);
                    let mut policies: Vec<String> =
                        chain[cycle_start..].iter().map(|s| s.to_string()).collect();
                    policies.push(id.to_string());
                    return Err(PolicyError::InheritanceCycle { policies });
                }
                chain.push(id);
                current = self.nodes.get(id).and_then(|doc| doc.parent_id());
            }

            rooted.extend(chain);
        }

        Ok(())
    }

    /// Level-ordered upload batches; see the module docs.
    ///
    /// Ids within a batch come out sorted, but batches are sets and callers
    /// must not rely on that order.
    pub fn batches(&self) -> Vec<Vec<PolicyDocument>> {
        let mut batches = Vec::new();
        let mut level: Vec<&str> = self.roots().map(|doc| doc.id()).collect();

        while !level.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            let mut batch = Vec::with_capacity(level.len());
            for id in &level {
                if let Some(doc) = self.nodes.get(*id) {
                    batch.push(doc.clone());
                }
                if let Some(kids) = self.children.get(*id) {
                    next.extend(kids.iter().map(String::as_str));
                }
            }
            next.sort_unstable();
            batches.push(batch);
            level = next;
        }

        batches
    }

    /// Policies without a parent.
    pub fn roots(&self) -> impl Iterator<Item = &PolicyDocument> {
        self.nodes.values().filter(|doc| !doc.has_parent())
    }

    pub fn get(&self, policy_id: &str) -> Option<&PolicyDocument> {
        self.nodes.get(policy_id)
    }

    pub fn parent_of(&self, policy_id: &str) -> Option<&PolicyDocument> {
        self.nodes
            .get(policy_id)
            .and_then(|doc| doc.parent_id())
            .and_then(|parent| self.nodes.get(parent))
    }

    /// Direct children of `policy_id`, sorted by id.
    pub fn children_of(&self, policy_id: &str) -> Vec<&PolicyDocument> {
        self.children
            .get(policy_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// All `(child, parent)` edges, sorted by child id.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .values()
            .filter_map(|doc| doc.parent_id().map(|parent| (doc.id(), parent)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
