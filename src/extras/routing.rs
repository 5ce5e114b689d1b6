// rmmu_host/src/extras/routing.rs

//! Logical tool redirection: a static remap table and a dynamic spool-join table.
//!
//! Indices here are logical tool indices across the whole hub.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::rmmu::{RmmuError, RmmuResult};

/// Disjoint groups of tool indices. No index appears in two groups.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectionTable {
    groups: Vec<Vec<usize>>,
}

impl RedirectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, tool: usize) -> bool {
        self.groups.iter().any(|g| g.contains(&tool))
    }

    pub fn group_of(&self, tool: usize) -> Option<&[usize]> {
        self.groups.iter().find(|g| g.contains(&tool)).map(|g| g.as_slice())
    }

    /// Adds `group` unless one of its members already belongs to a group, or it repeats a member.
    /// A rejected insert leaves the table untouched.
    pub fn insert(&mut self, group: Vec<usize>) -> RmmuResult<()> {
        let mut seen = BTreeSet::new();
        for &tool in &group {
            if !seen.insert(tool) {
                return Err(RmmuError::routing(Some(tool), format!("T{} listed twice", tool)));
            }
            if self.contains(tool) {
                return Err(RmmuError::routing(Some(tool), format!("T{} is already part of another group", tool)));
            }
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

/// Both tables plus the substitutions made by spool joins during the current print.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Routing {
    tool_count: usize,
    remap: RedirectionTable,
    join: RedirectionTable,
    /// Runout tool -> tool that replaced it.
    substitutions: BTreeMap<usize, usize>,
}

impl Routing {
    pub fn new(tool_count: usize) -> Self {
        Routing { tool_count, ..Default::default() }
    }

    pub fn remap_table(&self) -> &RedirectionTable {
        &self.remap
    }

    pub fn join_table(&self) -> &RedirectionTable {
        &self.join
    }

    pub fn substitutions(&self) -> &BTreeMap<usize, usize> {
        &self.substitutions
    }

    fn check_tools(&self, group: &[usize]) -> RmmuResult<()> {
        match group.iter().find(|t| **t >= self.tool_count) {
            Some(&bad) => Err(RmmuError::config(Some(bad), format!("only {} tools configured", self.tool_count))),
            None => Ok(()),
        }
    }

    /// Swaps two tools for the next print. Not allowed while a print runs.
    pub fn remap(&mut self, pair: Vec<usize>, printing: bool) -> RmmuResult<()> {
        if printing {
            return Err(RmmuError::not_allowed(None, "toolhead remapping is not supported during a print"));
        }
        if pair.len() != 2 {
            return Err(RmmuError::routing(None, format!("a remap needs exactly 2 tools, got {}", pair.len())));
        }
        self.check_tools(&pair)?;
        self.remap.insert(pair)?;
        log::info!("Toolhead remap: {:?}", self.remap.groups());
        Ok(())
    }

    pub fn clear_remap(&mut self, printing: bool) -> RmmuResult<()> {
        if printing {
            return Err(RmmuError::not_allowed(None, "toolhead remapping is not supported during a print"));
        }
        self.remap.clear();
        Ok(())
    }

    /// Joins spools so one can replace another after a runout. At most one member may be
    /// used by the running print.
    pub fn join(&mut self, group: Vec<usize>, required: Option<&BTreeSet<usize>>) -> RmmuResult<()> {
        if group.len() < 2 || group.len() > self.tool_count {
            return Err(RmmuError::routing(
                None,
                format!("a spool join needs 2 to {} tools, got {}", self.tool_count, group.len()),
            ));
        }
        self.check_tools(&group)?;
        if let Some(required) = required {
            let used = group.iter().filter(|t| required.contains(t)).count();
            if used > 1 {
                return Err(RmmuError::routing(None, "joined spools are part of the ongoing print"));
            }
        }
        self.join.insert(group)?;
        log::info!("Spool join: {:?}", self.join.groups());
        Ok(())
    }

    pub fn clear_join(&mut self) {
        self.join.clear();
        self.substitutions.clear();
    }

    /// Partner of `tool` in the remap table, or `tool` itself.
    pub fn remapped(&self, tool: usize) -> usize {
        self.remap
            .group_of(tool)
            .and_then(|g| g.iter().copied().find(|t| *t != tool))
            .unwrap_or(tool)
    }

    /// Tool that actually serves `tool`: remap first, then any spool join substitution.
    pub fn resolve(&self, tool: usize) -> usize {
        let mut current = self.remapped(tool);
        let mut visited = BTreeSet::new();
        while let Some(&next) = self.substitutions.get(&current) {
            if !visited.insert(current) {
                break;
            }
            current = next;
        }
        current
    }

    /// Members of `tool`'s join group other than `tool`, in group order.
    pub fn join_candidates(&self, tool: usize) -> Vec<usize> {
        self.join
            .group_of(tool)
            .map(|g| g.iter().copied().filter(|t| *t != tool).collect())
            .unwrap_or_default()
    }

    pub fn clear_substitutions(&mut self) {
        self.substitutions.clear();
    }

    pub fn substitute(&mut self, from: usize, to: usize) {
        log::info!("Spool join: T{} continues with T{}", from, to);
        self.substitutions.insert(from, to);
    }

    /// Every join group may hold at most one tool the print needs.
    pub fn validate_join_for(&self, required: &BTreeSet<usize>) -> RmmuResult<()> {
        for group in self.join.groups() {
            if group.iter().filter(|t| required.contains(t)).count() > 1 {
                return Err(RmmuError::routing(None, format!("joined spools {:?} are part of the print", group)));
            }
        }
        Ok(())
    }

    /// Drops both tables and the substitutions.
    pub fn reset(&mut self) {
        self.remap.clear();
        self.clear_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rejects_overlap_and_keeps_state() {
        let mut table = RedirectionTable::new();
        table.insert(vec![0, 1]).unwrap();
        let err = table.insert(vec![1, 2]).unwrap_err();
        assert!(matches!(err, RmmuError::RoutingConflict { tool: Some(1), .. }));
        assert_eq!(table.groups(), &[vec![0, 1]]);
        assert!(table.insert(vec![3, 3]).is_err());
        assert_eq!(table.groups().len(), 1);
    }

    #[test]
    fn remap_swaps_both_ways() {
        let mut routing = Routing::new(4);
        routing.remap(vec![1, 3], false).unwrap();
        assert_eq!(routing.resolve(1), 3);
        assert_eq!(routing.resolve(3), 1);
        assert_eq!(routing.resolve(0), 0);
    }

    #[test]
    fn remap_is_rejected_during_print() {
        let mut routing = Routing::new(4);
        assert!(matches!(
            routing.remap(vec![0, 1], true),
            Err(RmmuError::ConcurrencyViolation { .. })
        ));
        assert!(routing.remap_table().is_empty());
        assert!(matches!(routing.remap(vec![0, 1, 2], false), Err(RmmuError::RoutingConflict { .. })));
    }

    #[test]
    fn join_rejects_two_required_tools() {
        let mut routing = Routing::new(4);
        let required: BTreeSet<usize> = [0, 2].into_iter().collect();
        assert!(routing.join(vec![0, 2], Some(&required)).is_err());
        routing.join(vec![0, 1], Some(&required)).unwrap();
        assert!(routing.validate_join_for(&required).is_ok());
        let all: BTreeSet<usize> = (0..4).collect();
        assert!(routing.validate_join_for(&all).is_err());
    }

    #[test]
    fn resolve_follows_remap_then_substitution() {
        let mut routing = Routing::new(4);
        routing.remap(vec![0, 2], false).unwrap();
        routing.join(vec![2, 3], None).unwrap();
        routing.substitute(2, 3);
        assert_eq!(routing.resolve(0), 3);
        assert_eq!(routing.join_candidates(2), vec![3]);

        // A substitution cycle terminates.
        routing.substitute(3, 2);
        let resolved = routing.resolve(2);
        assert!(resolved == 2 || resolved == 3);

        routing.reset();
        assert_eq!(routing.resolve(0), 0);
        assert!(routing.substitutions().is_empty());
    }

    #[test]
    fn out_of_range_tools_are_configuration_errors() {
        let mut routing = Routing::new(4);
        assert!(matches!(routing.join(vec![1, 7], None), Err(RmmuError::Configuration { tool: Some(7), .. })));
    }
}
