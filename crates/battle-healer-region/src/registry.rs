//! Static rooted tree of region nodes, loaded once at initialization and
//! queried for health-aware failover targets.

use battle_healer_common::types::{RegionHealth, RegionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A single node in the region tree. Immutable once the registry is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionNode {
    pub id: RegionId,
    pub label: String,
    pub provider: String,
    pub endpoint: String,
    pub weight: Option<u32>,
    pub children: Vec<RegionNode>,
    pub fallbacks: Vec<RegionId>,
}

impl RegionNode {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let id = id.into();
        RegionNode {
            label: id.clone(),
            provider: String::new(),
            id,
            endpoint: endpoint.into(),
            weight: None,
            children: Vec::new(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<RegionNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<RegionId>) -> Self {
        self.fallbacks = fallbacks;
        self
    }
}

/// Options modifying how `resolve_next` selects a failover candidate.
#[derive(Debug, Clone, Default)]
pub struct ResolveOpts {
    pub force_include: HashSet<RegionId>,
}

/// Health-aware lookup over a static tree of `RegionNode`s.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    root: Option<RegionNode>,
    by_id: HashMap<RegionId, RegionNode>,
}

impl RegionRegistry {
    pub fn new(root: RegionNode) -> Self {
        let mut by_id = HashMap::new();
        index_node(&root, &mut by_id);
        RegionRegistry {
            root: Some(root),
            by_id,
        }
    }

    /// An empty registry, useful as a default for configurations that don't
    /// need multi-region failover.
    pub fn empty() -> Self {
        RegionRegistry {
            root: None,
            by_id: HashMap::new(),
        }
    }

    pub fn root(&self) -> Option<&RegionNode> {
        self.root.as_ref()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&RegionNode> {
        self.by_id.get(id)
    }

    pub fn find_by_endpoint(&self, endpoint: &str) -> Option<&RegionNode> {
        let needle = endpoint.to_ascii_lowercase();
        self.by_id
            .values()
            .find(|node| node.endpoint.to_ascii_lowercase() == needle)
    }

    /// Pre-order traversal of every node in the tree.
    pub fn flatten(&self) -> Vec<&RegionNode> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            flatten_into(root, &mut out);
        }
        out
    }

    /// Top-level children of the root, used as the Supervisor's default
    /// region list.
    pub fn root_children(&self) -> Vec<RegionId> {
        self.root
            .as_ref()
            .map(|r| r.children.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    /// BFS over `children ++ fallbacks` of the node identified by `current_id`,
    /// skipping unhealthy/deprecated nodes unless explicitly force-included.
    /// Falls back to the first root child if the search is exhausted; returns
    /// `None` only when the tree is empty.
    pub fn resolve_next(
        &self,
        current_id: &str,
        health: &HashMap<RegionId, RegionHealth>,
        opts: &ResolveOpts,
    ) -> Option<&RegionNode> {
        let root = self.root.as_ref()?;
        let current = self.by_id.get(current_id);

        let mut queue: VecDeque<&RegionId> = VecDeque::new();
        let mut visited: HashSet<RegionId> = HashSet::new();
        visited.insert(current_id.to_string());

        if let Some(node) = current {
            for child in &node.children {
                queue.push_back(&child.id);
            }
            for fallback in &node.fallbacks {
                queue.push_back(fallback);
            }
        }

        while let Some(candidate_id) = queue.pop_front() {
            if visited.contains(candidate_id) {
                continue;
            }
            visited.insert(candidate_id.clone());

            if let Some(candidate) = self.by_id.get(candidate_id) {
                if is_selectable(candidate_id, health, &opts.force_include) {
                    return Some(candidate);
                }
                for child in &candidate.children {
                    queue.push_back(&child.id);
                }
                for fallback in &candidate.fallbacks {
                    queue.push_back(fallback);
                }
            }
        }

        root.children.first()
    }
}

fn is_selectable(
    id: &str,
    health: &HashMap<RegionId, RegionHealth>,
    force_include: &HashSet<RegionId>,
) -> bool {
    if force_include.contains(id) {
        return true;
    }
    !matches!(
        health.get(id),
        Some(RegionHealth::Unhealthy) | Some(RegionHealth::Deprecated)
    )
}

fn index_node(node: &RegionNode, by_id: &mut HashMap<RegionId, RegionNode>) {
    by_id.insert(node.id.clone(), node.clone());
    for child in &node.children {
        index_node(child, by_id);
    }
}

fn flatten_into<'a>(node: &'a RegionNode, out: &mut Vec<&'a RegionNode>) {
    out.push(node);
    for child in &node.children {
        flatten_into(child, out);
    }
}
