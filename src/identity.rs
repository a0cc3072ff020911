use std::collections::HashMap;

/// Maps unstable external keys (e.g. `OL123W`) to dense run-local surrogate ids.
///
/// One resolver is kept per entity type and passed explicitly into the code
/// that needs it; the mapping lives only for the duration of a run.
pub struct IdentityResolver {
    next_id: u64,
    ids: HashMap<String, u64>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ids: HashMap::new(),
        }
    }

    /// Returns the surrogate id for `old_id`, assigning the next dense id on
    /// first sight. Returns `None` only when the counter is exhausted; callers
    /// treat that as a per-record skip, not a failure.
    pub fn resolve(&mut self, old_id: &str) -> Option<u64> {
        if let Some(&id) = self.ids.get(old_id) {
            return Some(id);
        }
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1)?;
        self.ids.insert(old_id.to_string(), id);
        Some(id)
    }

    /// Looks up an already-assigned id without assigning a new one.
    pub fn get(&self, old_id: &str) -> Option<u64> {
        self.ids.get(old_id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn mapping(&self) -> &HashMap<String, u64> {
        &self.ids
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_idempotent_within_a_run() {
        let mut resolver = IdentityResolver::new();
        let a = resolver.resolve("OL1W").unwrap();
        let b = resolver.resolve("OL2W").unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve("OL1W"), Some(a));
            assert_eq!(resolver.resolve("OL2W"), Some(b));
        }
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_dense_and_start_at_one() {
        let mut resolver = IdentityResolver::new();
        let ids: Vec<u64> = (0..100)
            .map(|i| resolver.resolve(&format!("OL{}M", i)).unwrap())
            .collect();
        assert_eq!(ids, (1..=100).collect::<Vec<u64>>());
    }

    #[test]
    fn get_does_not_assign() {
        let mut resolver = IdentityResolver::new();
        assert_eq!(resolver.get("OL9A"), None);
        let id = resolver.resolve("OL9A").unwrap();
        assert_eq!(resolver.get("OL9A"), Some(id));
        assert_eq!(resolver.len(), 1);
    }
}
