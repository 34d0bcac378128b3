//! 路由表内存存储实现

use crate::error::StorageError;
use crate::models::RoutingRule;
use crate::traits::RoutingStore;
use std::collections::HashMap;
use std::sync::RwLock;

type RuleKey = (String, String);

/// 路由表内存存储
///
/// 键为 `(device_id, metric_type)`，只做精确匹配。
pub struct InMemoryRoutingStore {
    rules: RwLock<HashMap<RuleKey, RoutingRule>>,
}

impl InMemoryRoutingStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_rules(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules: RwLock::new(index_rules(rules)),
        }
    }
}

impl Default for InMemoryRoutingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn index_rules(rules: Vec<RoutingRule>) -> HashMap<RuleKey, RoutingRule> {
    rules.into_iter().map(|rule| (rule.key(), rule)).collect()
}

#[async_trait::async_trait]
impl RoutingStore for InMemoryRoutingStore {
    async fn find_rule(
        &self,
        device_id: &str,
        metric_type: &str,
    ) -> Result<Option<RoutingRule>, StorageError> {
        let map = self
            .rules
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map
            .get(&(device_id.to_string(), metric_type.to_string()))
            .cloned())
    }

    async fn list_rules(&self) -> Result<Vec<RoutingRule>, StorageError> {
        let map = self
            .rules
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<RoutingRule> = map.values().cloned().collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(items)
    }

    async fn replace_rules(&self, rules: Vec<RoutingRule>) -> Result<(), StorageError> {
        let next = index_rules(rules);
        let mut map = self
            .rules
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        *map = next;
        Ok(())
    }
}
