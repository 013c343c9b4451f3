//! Parent/child kinship graph and the tree layout handed to the external
//! renderer. The graph is a DAG by construction: inserts that would close a
//! cycle are refused.

use std::collections::{HashMap, HashSet};

use tracing::info;

use records::{GuildId, KinEdge, TreeLayout, TreeLevel, TreeStyle, UserId};

use crate::LedgerError;

use super::{default_theme_or, FamilyKernel};

/// Per-request overrides for the tree style; `None` falls back to the
/// guild's stored settings.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    pub theme: Option<String>,
    pub rtl: Option<bool>,
    pub avatars: Option<bool>,
}

impl FamilyKernel {
    /// Adds a parent -> child edge. Self-parenting and anything that would
    /// make someone their own ancestor are rejected; duplicates are no-ops.
    pub fn add_kin_edge(
        &mut self,
        parent_id: UserId,
        child_id: UserId,
    ) -> Result<(), LedgerError> {
        if parent_id == child_id {
            return Err(LedgerError::KinshipCycle {
                parent_id,
                child_id,
            });
        }
        // The edge closes a cycle exactly when the child is already an
        // ancestor of the parent.
        let mut seen = HashSet::new();
        let mut stack = vec![parent_id];
        while let Some(current) = stack.pop() {
            if current == child_id {
                return Err(LedgerError::KinshipCycle {
                    parent_id,
                    child_id,
                });
            }
            if seen.insert(current) {
                stack.extend(self.store.parents_of(current)?);
            }
        }

        self.store.insert_kin_edge(KinEdge {
            parent_id,
            child_id,
        })?;
        info!(parent_id, child_id, "kin edge added");
        Ok(())
    }

    pub fn remove_kin_edge(
        &mut self,
        parent_id: UserId,
        child_id: UserId,
    ) -> Result<(), LedgerError> {
        self.store.delete_kin_edge(KinEdge {
            parent_id,
            child_id,
        })?;
        Ok(())
    }

    pub fn parents_of(&self, child_id: UserId) -> Result<Vec<UserId>, LedgerError> {
        Ok(self.store.parents_of(child_id)?)
    }

    pub fn children_of(&self, parent_id: UserId) -> Result<Vec<UserId>, LedgerError> {
        Ok(self.store.children_of(parent_id)?)
    }

    /// Lays out a family as generation rows for the external renderer.
    ///
    /// A member's depth is the length of its longest parent chain within
    /// the family; members with no in-family parents sit at depth zero.
    /// Rows are ordered shallowest first, members within a row by ascending
    /// id (reversed when the style is right-to-left). Only edges with both
    /// ends in the family are included.
    pub fn tree_layout(
        &self,
        guild_id: GuildId,
        family_key: &str,
        options: &TreeOptions,
    ) -> Result<TreeLayout, LedgerError> {
        let rel_id = self.resolve_family(guild_id, family_key)?;
        let relation = self.relation(&rel_id)?;
        let members = self.store.relation_members(&rel_id)?;
        let member_set: HashSet<UserId> = members.iter().copied().collect();

        let mut parents: HashMap<UserId, Vec<UserId>> = HashMap::new();
        let mut edges = Vec::new();
        for edge in self.store.kin_edges()? {
            if member_set.contains(&edge.parent_id) && member_set.contains(&edge.child_id) {
                parents.entry(edge.child_id).or_default().push(edge.parent_id);
                edges.push(edge);
            }
        }

        let mut depths: HashMap<UserId, usize> = HashMap::new();
        let mut visiting = HashSet::new();
        for member in &members {
            depth_of(*member, &parents, &mut depths, &mut visiting);
        }

        let max_depth = depths.values().copied().max().unwrap_or(0);
        let settings = self.store.guild_settings(guild_id)?;
        let style = TreeStyle {
            theme: default_theme_or(options.theme.as_deref().unwrap_or(&settings.theme))
                .to_string(),
            rtl: options.rtl.unwrap_or(settings.rtl),
            avatars: options.avatars.unwrap_or(settings.avatars),
        };

        let mut levels = Vec::with_capacity(max_depth + 1);
        for depth in 0..=max_depth {
            let mut row: Vec<UserId> = members
                .iter()
                .copied()
                .filter(|member| depths.get(member).copied().unwrap_or(0) == depth)
                .collect();
            row.sort_unstable();
            if style.rtl {
                row.reverse();
            }
            levels.push(TreeLevel {
                depth,
                members: row.iter().map(|member| member.to_string()).collect(),
            });
        }

        Ok(TreeLayout {
            rel_id,
            family_name: relation.name.unwrap_or_default(),
            levels,
            edges,
            style,
        })
    }
}

/// Longest parent chain, memoized. The visiting set breaks out of any cycle
/// that predates the insert-time check (e.g. rows written by older builds).
fn depth_of(
    member: UserId,
    parents: &HashMap<UserId, Vec<UserId>>,
    depths: &mut HashMap<UserId, usize>,
    visiting: &mut HashSet<UserId>,
) -> usize {
    if let Some(depth) = depths.get(&member) {
        return *depth;
    }
    if !visiting.insert(member) {
        return 0;
    }
    let depth = parents
        .get(&member)
        .map(|list| {
            list.iter()
                .map(|parent| depth_of(*parent, parents, depths, visiting) + 1)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    visiting.remove(&member);
    depths.insert(member, depth);
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_follows_longest_parent_chain() {
        let mut parents: HashMap<UserId, Vec<UserId>> = HashMap::new();
        parents.insert(3, vec![1, 2]);
        parents.insert(2, vec![1]);

        let mut depths = HashMap::new();
        let mut visiting = HashSet::new();
        assert_eq!(depth_of(1, &parents, &mut depths, &mut visiting), 0);
        assert_eq!(depth_of(2, &parents, &mut depths, &mut visiting), 1);
        // 3 has parents at depths 0 and 1; the longer chain wins.
        assert_eq!(depth_of(3, &parents, &mut depths, &mut visiting), 2);
    }

    #[test]
    fn stale_cycle_rows_do_not_hang_layout() {
        let mut parents: HashMap<UserId, Vec<UserId>> = HashMap::new();
        parents.insert(1, vec![2]);
        parents.insert(2, vec![1]);

        let mut depths = HashMap::new();
        let mut visiting = HashSet::new();
        let depth = depth_of(1, &parents, &mut depths, &mut visiting);
        assert!(depth <= 1);
    }
}
