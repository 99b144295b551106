//! `ScriptCache`: an indexed, in-memory snapshot of enabled scripts, keyed
//! by trigger type and refreshed wholesale whenever the admin layer edits a
//! script or its triggers.
//!
//! Reload is a snapshot-and-swap: a fresh map is built off to the side and
//! published via an atomic pointer swap, so readers never observe a
//! partially rebuilt cache and never block behind a reload in progress.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::Result;
use crate::repository::ScriptRepository;
use crate::types::{Script, Trigger, TriggerType};

/// One script as indexed for a specific trigger type: the script plus only
/// the subset of its triggers matching that type.
#[derive(Clone)]
pub struct IndexedScript {
    pub script: Arc<Script>,
    pub triggers: Vec<Trigger>,
}

struct Snapshot {
    by_trigger: HashMap<TriggerType, Vec<IndexedScript>>,
}

impl Snapshot {
    fn build(scripts: Vec<Script>) -> Self {
        let mut by_trigger: HashMap<TriggerType, Vec<IndexedScript>> = HashMap::new();

        for script in scripts {
            if !script.enabled {
                continue;
            }
            let script = Arc::new(script);

            let mut grouped: HashMap<TriggerType, Vec<Trigger>> = HashMap::new();
            for trigger in &script.triggers {
                if !trigger.enabled {
                    continue;
                }
                grouped.entry(trigger.trigger_type).or_default().push(trigger.clone());
            }

            for (trigger_type, triggers) in grouped {
                by_trigger.entry(trigger_type).or_default().push(IndexedScript {
                    script: script.clone(),
                    triggers,
                });
            }
        }

        // Deterministic dispatch order: priority descending, then id
        // ascending, matching every trigger's own (priority, id) ordering
        // regardless of load order from the repository.
        for scripts in by_trigger.values_mut() {
            scripts.sort_by(|a, b| {
                let a_priority = a.triggers.iter().map(|t| t.priority).max().unwrap_or(0);
                let b_priority = b.triggers.iter().map(|t| t.priority).max().unwrap_or(0);
                b_priority.cmp(&a_priority).then_with(|| a.script.id.cmp(&b.script.id))
            });
        }

        Self { by_trigger }
    }
}

pub struct ScriptCache {
    repository: Arc<dyn ScriptRepository>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ScriptCache {
    pub fn new(repository: Arc<dyn ScriptRepository>) -> Self {
        Self {
            repository,
            snapshot: RwLock::new(Arc::new(Snapshot {
                by_trigger: HashMap::new(),
            })),
        }
    }

    /// Loads enabled scripts from the repository and builds the initial
    /// snapshot. Called once at `Engine::start`.
    pub async fn load(&self) -> Result<()> {
        let scripts = self.repository.load_enabled_scripts().await?;
        let count = scripts.len();
        *self.snapshot.write() = Arc::new(Snapshot::build(scripts));
        info!(count, "script cache: loaded");
        Ok(())
    }

    /// Re-reads the repository and atomically swaps in a fresh snapshot.
    /// Called by the admin layer after any script or trigger mutation.
    pub async fn reload(&self) -> Result<()> {
        self.load().await
    }

    /// Returns every enabled script with at least one enabled trigger of
    /// `trigger_type` whose `topic_filter` is empty or matches `topic`,
    /// ordered by `(priority DESC, id ASC)`.
    pub fn get_for_trigger(&self, trigger_type: TriggerType, topic: &str) -> Vec<IndexedScript> {
        let snapshot = self.snapshot.read().clone();
        let Some(candidates) = snapshot.by_trigger.get(&trigger_type) else {
            return Vec::new();
        };

        candidates
            .iter()
            .filter(|indexed| {
                indexed
                    .triggers
                    .iter()
                    .any(|t| t.topic_filter.is_empty() || embermq_topic::matches(topic, &t.topic_filter))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerType;
    use async_trait::async_trait;

    struct FixedRepository(Vec<Script>);

    #[async_trait]
    impl ScriptRepository for FixedRepository {
        async fn load_enabled_scripts(&self) -> Result<Vec<Script>> {
            Ok(self.0.clone())
        }
    }

    fn script(id: &str, priority: i32, topic_filter: &str) -> Script {
        Script {
            id: id.into(),
            name: id.into(),
            content: "".into(),
            enabled: true,
            timeout_s: None,
            max_publishes: None,
            triggers: vec![Trigger {
                trigger_type: TriggerType::OnPublish,
                topic_filter: topic_filter.into(),
                priority,
                enabled: true,
            }],
        }
    }

    #[tokio::test]
    async fn disabled_scripts_and_triggers_are_excluded() {
        let mut disabled_script = script("a", 0, "t/#");
        disabled_script.enabled = false;
        let mut disabled_trigger = script("b", 0, "t/#");
        disabled_trigger.triggers[0].enabled = false;

        let cache = ScriptCache::new(Arc::new(FixedRepository(vec![disabled_script, disabled_trigger])));
        cache.load().await.unwrap();

        assert!(cache.get_for_trigger(TriggerType::OnPublish, "t/x").is_empty());
    }

    #[tokio::test]
    async fn matches_topic_filter_and_empty_filter_matches_anything() {
        let scripts = vec![script("a", 0, "sensors/#"), script("b", 0, "")];
        let cache = ScriptCache::new(Arc::new(FixedRepository(scripts)));
        cache.load().await.unwrap();

        let matched = cache.get_for_trigger(TriggerType::OnPublish, "sensors/kitchen");
        assert_eq!(matched.len(), 2);

        let matched = cache.get_for_trigger(TriggerType::OnPublish, "other/topic");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].script.id, "b");
    }

    #[tokio::test]
    async fn ordering_is_priority_desc_then_id_asc() {
        let scripts = vec![
            script("z", 5, ""),
            script("a", 5, ""),
            script("m", 10, ""),
        ];
        let cache = ScriptCache::new(Arc::new(FixedRepository(scripts)));
        cache.load().await.unwrap();

        let matched = cache.get_for_trigger(TriggerType::OnPublish, "any");
        let ids: Vec<&str> = matched.iter().map(|i| i.script.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "a", "z"]);
    }

    #[tokio::test]
    async fn reload_swaps_snapshot_atomically() {
        let cache = ScriptCache::new(Arc::new(FixedRepository(vec![script("a", 0, "")])));
        cache.load().await.unwrap();
        assert_eq!(cache.get_for_trigger(TriggerType::OnPublish, "x").len(), 1);

        // Simulate an admin edit: a fresh load now returns nothing.
        let empty = Arc::new(FixedRepository(vec![]));
        let cache2 = ScriptCache::new(empty);
        cache2.reload().await.unwrap();
        assert!(cache2.get_for_trigger(TriggerType::OnPublish, "x").is_empty());
    }
}
