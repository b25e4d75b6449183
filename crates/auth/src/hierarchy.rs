//! Scope tree and hierarchy queries.
//!
//! Scopes are held in a flat arena indexed by id. Integrity (every parent
//! resolves, parents share the child's org, no cycles) is checked once in
//! [`build_tree`]; queries afterwards trust the structure.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;

use scopegate_core::ScopeId;

use crate::error::{AuthzError, AuthzResult};
use crate::scope::Scope;

#[derive(Debug, Clone)]
struct ScopeNode {
    scope: Scope,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A validated, parent-indexed scope tree (possibly a forest of several roots).
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
    index: HashMap<ScopeId, usize>,
    roots: Vec<usize>,
}

/// Nested view of a tree, for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeTreeNode {
    #[serde(flatten)]
    pub scope: Scope,
    pub children: Vec<ScopeTreeNode>,
}

/// Index `scopes` by id and link children to parents in O(n).
///
/// Fails with `CycleOrOrphanDetected` on a duplicate id, a parent that is not
/// part of `scopes`, a parent from another org, or any cycle.
pub fn build_tree(scopes: Vec<Scope>) -> AuthzResult<ScopeTree> {
    let mut index = HashMap::with_capacity(scopes.len());
    for (pos, scope) in scopes.iter().enumerate() {
        if index.insert(scope.id, pos).is_some() {
            return Err(integrity(scope.id, "duplicate scope id"));
        }
    }

    let mut nodes: Vec<ScopeNode> = scopes
        .into_iter()
        .map(|scope| ScopeNode {
            scope,
            parent: None,
            children: Vec::new(),
        })
        .collect();

    let mut roots = Vec::new();
    for pos in 0..nodes.len() {
        let Some(parent_id) = nodes[pos].scope.parent_id else {
            roots.push(pos);
            continue;
        };
        let scope_id = nodes[pos].scope.id;
        let parent = *index
            .get(&parent_id)
            .ok_or_else(|| integrity(scope_id, format!("parent {parent_id} does not exist")))?;
        if parent == pos {
            return Err(integrity(scope_id, "scope is its own parent"));
        }
        if nodes[parent].scope.org_id != nodes[pos].scope.org_id {
            return Err(integrity(scope_id, format!("parent {parent_id} belongs to another org")));
        }
        nodes[pos].parent = Some(parent);
        nodes[parent].children.push(pos);
    }

    // Anything unreachable from a root sits on a cycle.
    let mut seen = vec![false; nodes.len()];
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    while let Some(pos) = queue.pop_front() {
        seen[pos] = true;
        queue.extend(nodes[pos].children.iter().copied());
    }
    if let Some(pos) = seen.iter().position(|reached| !reached) {
        return Err(integrity(nodes[pos].scope.id, "parent chain forms a cycle"));
    }

    let order: Vec<_> = nodes
        .iter()
        .map(|n| (n.scope.created_at, n.scope.name.clone()))
        .collect();
    for node in &mut nodes {
        node.children.sort_by(|&a, &b| order[a].cmp(&order[b]));
    }
    roots.sort_by(|&a, &b| order[a].cmp(&order[b]));

    Ok(ScopeTree {
        nodes,
        index,
        roots,
    })
}

fn integrity(scope_id: ScopeId, reason: impl Into<String>) -> AuthzError {
    AuthzError::CycleOrOrphanDetected {
        scope_id,
        reason: reason.into(),
    }
}

impl ScopeTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ScopeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.index.get(&id).map(|&pos| &self.nodes[pos].scope)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Scope> {
        self.roots.iter().map(|&pos| &self.nodes[pos].scope)
    }

    fn position(&self, id: ScopeId) -> AuthzResult<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| AuthzError::not_found("scope", id))
    }

    /// Walk upward from `pos` (inclusive), at most `len()` steps.
    fn upward(&self, pos: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(pos), |&p| self.nodes[p].parent).take(self.nodes.len())
    }

    /// Ordered path `[root, ..., scope_id]`.
    pub fn ancestors_of(&self, scope_id: ScopeId) -> AuthzResult<Vec<ScopeId>> {
        let pos = self.position(scope_id)?;
        let mut path: Vec<ScopeId> = self.upward(pos).map(|p| self.nodes[p].scope.id).collect();
        path.reverse();
        Ok(path)
    }

    /// True iff `candidate` is `target` or one of its ancestors.
    ///
    /// Unknown ids are never ancestors of anything.
    pub fn is_ancestor_or_self(&self, candidate: ScopeId, target: ScopeId) -> bool {
        let Some(&pos) = self.index.get(&target) else {
            return false;
        };
        self.upward(pos).any(|p| self.nodes[p].scope.id == candidate)
    }

    /// The granted scope closest to `target` along its ancestor path, if any.
    ///
    /// O(depth); the subtree below `target` is never visited.
    pub fn closest_granted(&self, target: ScopeId, granted: &HashSet<ScopeId>) -> Option<ScopeId> {
        let &pos = self.index.get(&target)?;
        self.upward(pos)
            .map(|p| self.nodes[p].scope.id)
            .find(|id| granted.contains(id))
    }

    /// Every scope strictly below `scope_id`.
    pub fn descendants_of(&self, scope_id: ScopeId) -> AuthzResult<BTreeSet<ScopeId>> {
        let pos = self.position(scope_id)?;
        let mut out = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.nodes[pos].children.iter().copied().collect();
        while let Some(p) = queue.pop_front() {
            out.insert(self.nodes[p].scope.id);
            queue.extend(self.nodes[p].children.iter().copied());
        }
        Ok(out)
    }

    /// Nested view of the whole forest.
    pub fn nested(&self) -> Vec<ScopeTreeNode> {
        self.roots.iter().map(|&pos| self.nest(pos)).collect()
    }

    fn nest(&self, pos: usize) -> ScopeTreeNode {
        let node = &self.nodes[pos];
        ScopeTreeNode {
            scope: node.scope.clone(),
            children: node.children.iter().map(|&c| self.nest(c)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use scopegate_core::OrgId;

    fn scope(name: &str, parent: Option<&Scope>, org: OrgId) -> Scope {
        let now = Utc::now();
        Scope {
            id: ScopeId::new(),
            name: name.to_string(),
            level_label: "unit".to_string(),
            parent_id: parent.map(|p| p.id),
            org_id: org,
            root_org_id: org,
            created_at: now,
            changed_at: now,
        }
    }

    /// root -> {a -> {a1, a2}, b}
    fn sample() -> (ScopeTree, Vec<Scope>) {
        let org = OrgId::new();
        let root = scope("root", None, org);
        let a = scope("a", Some(&root), org);
        let b = scope("b", Some(&root), org);
        let a1 = scope("a1", Some(&a), org);
        let a2 = scope("a2", Some(&a), org);
        let all = vec![a1.clone(), root.clone(), a.clone(), b.clone(), a2.clone()];
        (build_tree(all).unwrap(), vec![root, a, b, a1, a2])
    }

    #[test]
    fn ancestors_are_root_first_and_inclusive() {
        let (tree, s) = sample();
        assert_eq!(tree.ancestors_of(s[3].id).unwrap(), vec![s[0].id, s[1].id, s[3].id]);
        assert_eq!(tree.ancestors_of(s[0].id).unwrap(), vec![s[0].id]);
    }

    #[test]
    fn ancestors_of_unknown_scope_is_not_found() {
        let (tree, _) = sample();
        let err = tree.ancestors_of(ScopeId::new()).unwrap_err();
        assert!(matches!(err, AuthzError::NotFound { entity: "scope", .. }));
    }

    #[test]
    fn sibling_is_not_an_ancestor() {
        let (tree, s) = sample();
        assert!(tree.is_ancestor_or_self(s[1].id, s[3].id));
        assert!(!tree.is_ancestor_or_self(s[2].id, s[3].id));
        assert!(!tree.is_ancestor_or_self(s[3].id, s[4].id));
        assert!(!tree.is_ancestor_or_self(s[3].id, s[1].id));
    }

    #[test]
    fn closest_granted_prefers_the_nearest_ancestor() {
        let (tree, s) = sample();
        let granted: HashSet<_> = [s[0].id, s[1].id].into_iter().collect();
        assert_eq!(tree.closest_granted(s[3].id, &granted), Some(s[1].id));
        assert_eq!(tree.closest_granted(s[2].id, &granted), Some(s[0].id));
        assert_eq!(tree.closest_granted(ScopeId::new(), &granted), None);
    }

    #[test]
    fn descendants_exclude_self() {
        let (tree, s) = sample();
        let below_root = tree.descendants_of(s[0].id).unwrap();
        assert_eq!(below_root.len(), 4);
        assert!(!below_root.contains(&s[0].id));
        assert_eq!(
            tree.descendants_of(s[1].id).unwrap(),
            BTreeSet::from([s[3].id, s[4].id])
        );
        assert!(tree.descendants_of(s[2].id).unwrap().is_empty());
    }

    #[test]
    fn dangling_parent_is_rejected() {
        let org = OrgId::new();
        let ghost = scope("ghost", None, org);
        let child = scope("child", Some(&ghost), org);
        let err = build_tree(vec![child.clone()]).unwrap_err();
        match err {
            AuthzError::CycleOrOrphanDetected { scope_id, .. } => assert_eq!(scope_id, child.id),
            other => panic!("expected integrity error, got {other:?}"),
        }
        assert!(err_is_fatal(vec![child]));
    }

    fn err_is_fatal(scopes: Vec<Scope>) -> bool {
        build_tree(scopes).unwrap_err().is_fatal()
    }

    #[test]
    fn cross_org_parent_is_rejected() {
        let root = scope("root", None, OrgId::new());
        let child = scope("child", Some(&root), OrgId::new());
        let err = build_tree(vec![root, child]).unwrap_err();
        assert!(matches!(err, AuthzError::CycleOrOrphanDetected { .. }));
    }

    #[test]
    fn two_node_cycle_is_rejected_at_build_time() {
        let org = OrgId::new();
        let mut a = scope("a", None, org);
        let mut b = scope("b", None, org);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let root = scope("root", None, org);
        assert!(matches!(
            build_tree(vec![root, a, b]),
            Err(AuthzError::CycleOrOrphanDetected { .. })
        ));
    }

    #[test]
    fn self_parent_is_rejected() {
        let org = OrgId::new();
        let mut a = scope("a", None, org);
        a.parent_id = Some(a.id);
        assert!(build_tree(vec![a]).is_err());
    }

    #[test]
    fn nested_view_mirrors_structure() {
        let (tree, s) = sample();
        let nested = tree.nested();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].scope.id, s[0].id);
        assert_eq!(nested[0].children.len(), 2);
        let total: usize = nested[0].children.iter().map(|c| 1 + c.children.len()).sum();
        assert_eq!(total, 4);
    }

    /// Random forests: node `i` hangs under some node `< i`, or is a root.
    fn forest(parents: &[Option<usize>]) -> Vec<Scope> {
        let org = OrgId::new();
        let mut out: Vec<Scope> = Vec::with_capacity(parents.len());
        for (i, parent) in parents.iter().enumerate() {
            let parent = parent.filter(|_| i > 0).map(|p| p % i);
            let s = scope(&format!("s{i}"), parent.map(|p| &out[p]), org);
            out.push(s);
        }
        out
    }

    proptest! {
        #[test]
        fn every_scope_grants_itself(parents in proptest::collection::vec(proptest::option::of(0usize..64), 1..64)) {
            let scopes = forest(&parents);
            let tree = build_tree(scopes.clone()).unwrap();
            for s in &scopes {
                prop_assert!(tree.is_ancestor_or_self(s.id, s.id));
            }
        }

        #[test]
        fn ancestor_walk_is_bounded_and_rooted(parents in proptest::collection::vec(proptest::option::of(0usize..64), 1..64)) {
            let scopes = forest(&parents);
            let tree = build_tree(scopes.clone()).unwrap();
            for s in &scopes {
                let path = tree.ancestors_of(s.id).unwrap();
                prop_assert!(path.len() <= scopes.len());
                prop_assert_eq!(path.last().copied(), Some(s.id));
                prop_assert!(tree.get(path[0]).unwrap().is_root());
            }
        }

        #[test]
        fn induced_cycle_is_always_rejected(
            parents in proptest::collection::vec(proptest::option::of(0usize..64), 2..64),
            pick in 0usize..64,
        ) {
            let mut scopes = forest(&parents);
            // Point some root at one of its own descendants (or itself).
            let roots: Vec<usize> = (0..scopes.len()).filter(|&i| scopes[i].parent_id.is_none()).collect();
            let root = roots[pick % roots.len()];
            let tree = build_tree(scopes.clone()).unwrap();
            let below: Vec<ScopeId> = tree.descendants_of(scopes[root].id).unwrap().into_iter().collect();
            let new_parent = if below.is_empty() { scopes[root].id } else { below[pick % below.len()] };
            scopes[root].parent_id = Some(new_parent);
            prop_assert!(build_tree(scopes).is_err());
        }
    }
}
