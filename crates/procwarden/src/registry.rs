//! Tag → process table

use std::collections::HashMap;
use std::sync::Arc;

use crate::process::ManagedProcess;

/// Every process a supervisor created, plus the latest one per tag
///
/// Entries are never removed. Registering a tag again replaces the tag
/// lookup but keeps the earlier process in [`ProcessRegistry::all`], so
/// cleanup still reaches it.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    by_tag: HashMap<String, Arc<ManagedProcess>>,
    all: Vec<Arc<ManagedProcess>>,
}

impl ProcessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process, returning the entry it replaced for that tag
    pub fn insert(&mut self, process: Arc<ManagedProcess>) -> Option<Arc<ManagedProcess>> {
        self.all.push(Arc::clone(&process));
        self.by_tag.insert(process.tag().to_string(), process)
    }

    /// Latest process registered under `tag`
    pub fn tagged(&self, tag: &str) -> Option<Arc<ManagedProcess>> {
        self.by_tag.get(tag).cloned()
    }

    /// All processes in creation order
    pub fn all(&self) -> &[Arc<ManagedProcess>] {
        &self.all
    }

    /// Processes with a live subprocess
    pub fn live(&self) -> Vec<Arc<ManagedProcess>> {
        self.all.iter().filter(|p| p.is_alive()).cloned().collect()
    }

    /// Number of processes ever registered
    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Whether nothing was registered yet
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::test_context;
    use crate::spec::ProcessSpec;
    use std::time::Duration;

    fn process(tag: &str) -> Arc<ManagedProcess> {
        Arc::new(ManagedProcess::new(
            ProcessSpec::new(tag, "sleep 30", 9000),
            test_context(Duration::from_secs(5)),
        ))
    }

    #[test]
    fn test_tagged_lookup() {
        let mut registry = ProcessRegistry::new();
        assert!(registry.tagged("db").is_none());

        registry.insert(process("db"));
        registry.insert(process("cache"));

        assert_eq!(registry.tagged("db").unwrap().tag(), "db");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reinsert_replaces_lookup_but_keeps_history() {
        let mut registry = ProcessRegistry::new();
        let first = process("db");
        let second = process("db");

        assert!(registry.insert(Arc::clone(&first)).is_none());
        let replaced = registry.insert(Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.tagged("db").unwrap(), &second));
        assert_eq!(registry.all().len(), 2);
    }

    #[tokio::test]
    async fn test_live_only_lists_spawned_processes() {
        let mut registry = ProcessRegistry::new();
        let idle = process("idle");
        let running = process("running");
        registry.insert(Arc::clone(&idle));
        registry.insert(Arc::clone(&running));

        running.start().unwrap();
        let live = registry.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].tag(), "running");

        running.stop().await.unwrap();
        assert!(registry.live().is_empty());
    }
}
