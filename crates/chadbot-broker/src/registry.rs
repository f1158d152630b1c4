//! Globally-unique skill registry.
//!
//! Reads dominate (every LLM turn snapshots the table), so the map sits
//! behind a readers-writer lock. Lookups racing with an unregister see
//! "not found"; the manager purges skills before the plugin record goes
//! away.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use chadbot_core::error::{BrokerError, BrokerResult};
use chadbot_core::skill::Skill;

/// A registered skill with its owner back-reference.
#[derive(Debug, Clone)]
pub struct SkillEntry {
    pub skill: Skill,
    pub plugin_id: String,
    pub plugin_name: String,
}

/// Uniquely-named skill table.
#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, SkillEntry>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a skill for a plugin.
    ///
    /// # Errors
    ///
    /// [`BrokerError::DuplicateSkill`] when the name is taken; the earlier
    /// registration stands.
    pub fn register(&self, plugin_id: &str, plugin_name: &str, skill: Skill) -> BrokerResult<()> {
        let mut skills = self.skills.write();
        if let Some(existing) = skills.get(&skill.name) {
            return Err(BrokerError::DuplicateSkill {
                name: skill.name.clone(),
                owner: existing.plugin_name.clone(),
            });
        }
        info!(skill = %skill.name, plugin = %plugin_name, "Skill registered");
        skills.insert(
            skill.name.clone(),
            SkillEntry {
                skill,
                plugin_id: plugin_id.to_string(),
                plugin_name: plugin_name.to_string(),
            },
        );
        Ok(())
    }

    /// Removes every skill owned by `plugin_id`. Returns how many were
    /// removed.
    pub fn unregister_all_of(&self, plugin_id: &str) -> usize {
        let mut skills = self.skills.write();
        let before = skills.len();
        skills.retain(|_, entry| entry.plugin_id != plugin_id);
        let removed = before - skills.len();
        if removed > 0 {
            debug!(plugin_id = %plugin_id, removed, "Skills unregistered");
        }
        removed
    }

    /// Looks up a skill by name.
    pub fn lookup(&self, name: &str) -> Option<SkillEntry> {
        self.skills.read().get(name).cloned()
    }

    /// Snapshot of every registered skill, sorted by name.
    pub fn snapshot(&self) -> Vec<SkillEntry> {
        let mut entries: Vec<SkillEntry> = self.skills.read().values().cloned().collect();
        entries.sort_by(|a, b| a.skill.name.cmp(&b.skill.name));
        entries
    }

    /// Distinct names of plugins that currently own at least one skill,
    /// sorted.
    pub fn plugins_with_skills(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .skills
            .read()
            .values()
            .map(|e| e.plugin_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str) -> Skill {
        Skill {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = SkillRegistry::new();
        registry.register("p1", "alpha", skill("foo")).unwrap();

        let err = registry.register("p2", "beta", skill("foo")).unwrap_err();
        match err {
            BrokerError::DuplicateSkill { name, owner } => {
                assert_eq!(name, "foo");
                assert_eq!(owner, "alpha");
            }
            other => panic!("unexpected error: {other}"),
        }
        // The earlier registration stands.
        assert_eq!(registry.lookup("foo").unwrap().plugin_id, "p1");
    }

    #[test]
    fn unregister_purges_only_the_owner() {
        let registry = SkillRegistry::new();
        registry.register("p1", "alpha", skill("a")).unwrap();
        registry.register("p1", "alpha", skill("b")).unwrap();
        registry.register("p2", "beta", skill("c")).unwrap();

        assert_eq!(registry.unregister_all_of("p1"), 2);
        assert!(registry.lookup("a").is_none());
        assert!(registry.lookup("b").is_none());
        assert_eq!(registry.lookup("c").unwrap().plugin_id, "p2");
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = SkillRegistry::new();
        registry.register("p1", "alpha", skill("zeta")).unwrap();
        registry.register("p1", "alpha", skill("add")).unwrap();

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|e| e.skill.name)
            .collect();
        assert_eq!(names, vec!["add", "zeta"]);
    }

    #[test]
    fn plugins_with_skills_deduplicates() {
        let registry = SkillRegistry::new();
        registry.register("p1", "alpha", skill("a")).unwrap();
        registry.register("p1", "alpha", skill("b")).unwrap();
        registry.register("p2", "beta", skill("c")).unwrap();

        assert_eq!(registry.plugins_with_skills(), vec!["alpha", "beta"]);
    }
}
