//! The ordered set of active mocks.

use crate::mock::Mock;
use std::sync::Arc;

/// Insert `mock` before the first mock whose priority is not higher than its
/// own, returning the position it landed at.
///
/// Mocks stay sorted by descending priority. Among equal priorities the
/// newest mock is tried first.
pub fn insert_by_priority(mocks: &mut Vec<Arc<Mock>>, mock: Arc<Mock>) -> usize {
    let priority = mock.priority();
    let index = mocks
        .iter()
        .position(|existing| existing.priority() <= priority)
        .unwrap_or(mocks.len());
    mocks.insert(index, mock);
    index
}

/// Active mocks in match-attempt order.
#[derive(Debug)]
pub struct MockRegistry {
    mocks: Vec<Arc<Mock>>,
    next_id: u64,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            mocks: Vec::new(),
            next_id: 1,
        }
    }

    /// Allocate the next diagnostic mock id.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add a mock, returning its position in match order.
    pub fn add(&mut self, mock: Arc<Mock>) -> usize {
        insert_by_priority(&mut self.mocks, mock)
    }

    /// Remove a mock by identity. Returns whether it was registered.
    pub fn remove(&mut self, mock: &Arc<Mock>) -> bool {
        let before = self.mocks.len();
        self.mocks.retain(|existing| !Arc::ptr_eq(existing, mock));
        self.mocks.len() != before
    }

    pub fn clear(&mut self) {
        self.mocks.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mock>> {
        self.mocks.iter()
    }

    /// Cheap copy of the current match order.
    pub fn snapshot(&self) -> Vec<Arc<Mock>> {
        self.mocks.clone()
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalSettings;
    use crate::filter::RequestMatcherSpec;
    use crate::mock::MockOptions;
    use crate::response::MockResponse;

    fn mock(registry: &mut MockRegistry, priority: i32) -> Arc<Mock> {
        Arc::new(
            Mock::new(
                registry.next_id(),
                &RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::new(),
                MockOptions::default().with_priority(priority),
                Arc::new(GlobalSettings::default()),
            )
            .unwrap(),
        )
    }

    fn ids(registry: &MockRegistry) -> Vec<u64> {
        registry.iter().map(|m| m.id()).collect()
    }

    #[test]
    fn test_higher_priority_goes_first() {
        let mut registry = MockRegistry::new();
        let low = mock(&mut registry, 0);
        registry.add(low);
        let high = mock(&mut registry, 10);
        assert_eq!(registry.add(Arc::clone(&high)), 0);
        assert!(Arc::ptr_eq(registry.iter().next().unwrap(), &high));
    }

    #[test]
    fn test_middle_priority_lands_between() {
        let mut registry = MockRegistry::new();
        let m0 = mock(&mut registry, 0);
        let m10 = mock(&mut registry, 10);
        let m5 = mock(&mut registry, 5);
        registry.add(m0);
        registry.add(m10);
        assert_eq!(registry.add(m5), 1);
        assert_eq!(ids(&registry), vec![2, 3, 1]);
    }

    #[test]
    fn test_lowest_priority_goes_last() {
        let mut registry = MockRegistry::new();
        let m10 = mock(&mut registry, 10);
        let m5 = mock(&mut registry, 5);
        let m3 = mock(&mut registry, 3);
        registry.add(m10);
        registry.add(m5);
        assert_eq!(registry.add(m3), 2);
    }

    #[test]
    fn test_newest_wins_ties() {
        let mut registry = MockRegistry::new();
        let m10 = mock(&mut registry, 10);
        let first5 = mock(&mut registry, 5);
        let second5 = mock(&mut registry, 5);
        registry.add(m10);
        registry.add(first5);
        assert_eq!(registry.add(second5), 1);
        assert_eq!(ids(&registry), vec![1, 3, 2]);
    }

    #[test]
    fn test_descending_order_regardless_of_registration_order() {
        let mut registry = MockRegistry::new();
        for priority in [3, -1, 7, 0, 7, 3, 12] {
            let m = mock(&mut registry, priority);
            registry.add(m);
        }
        let priorities: Vec<i32> = registry.iter().map(|m| m.priority()).collect();
        assert_eq!(priorities, vec![12, 7, 7, 3, 3, 0, -1]);
        // Ties: newest first.
        assert_eq!(ids(&registry), vec![7, 5, 3, 6, 1, 4, 2]);
    }

    #[test]
    fn test_remove_by_identity() {
        let mut registry = MockRegistry::new();
        let a = mock(&mut registry, 0);
        let b = mock(&mut registry, 0);
        let c = mock(&mut registry, 0);
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));
        registry.add(Arc::clone(&c));

        assert!(registry.remove(&b));
        assert_eq!(ids(&registry), vec![3, 1]);
        assert!(!registry.remove(&b));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
    }
}
