//! Pure instance selection over a pool

use std::collections::HashSet;
use thiserror::Error;

use crate::domain::expression::split_list;
use crate::domain::instance::{Instance, InstanceUnitType, SelectionParams};
use crate::CoreError;

/// Why a selection could not be made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Named hosts are not part of the pool
    #[error("Hosts not found in the pool: {}", .0.join(", "))]
    UnresolvedHosts(Vec<String>),
}

impl From<SelectionError> for CoreError {
    fn from(err: SelectionError) -> Self {
        CoreError::InvalidInput(err.to_string())
    }
}

/// Number of instances a request asks for, given the pool size.
///
/// Percentages round up and are clamped to the pool; counts are returned as
/// requested and bounded later by pool exhaustion.
pub fn target_count(count: u32, unit: InstanceUnitType, pool_size: usize) -> usize {
    match unit {
        InstanceUnitType::Count => count as usize,
        InstanceUnitType::Percentage => {
            let wanted = (u64::from(count) * pool_size as u64 + 99) / 100;
            (wanted as usize).min(pool_size)
        }
    }
}

/// Expand rendered host entries, which may hold comma-separated lists, dropping duplicates
pub fn expand_host_names<S: AsRef<str>>(rendered: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    rendered
        .iter()
        .flat_map(|entry| split_list(entry.as_ref()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Select instances from `pool` according to `params`.
///
/// The result is always in pool order. Excluded instance ids are never
/// selected. With specific hosts, only instances whose display name was
/// requested are eligible and every requested name must exist in the pool.
pub fn select(pool: &[Instance], params: &SelectionParams) -> Result<Vec<Instance>, SelectionError> {
    let eligible = |instance: &&Instance| !params.excluded_instance_ids.contains(&instance.id);

    if params.select_specific_hosts {
        let wanted: HashSet<&str> = params.host_names.iter().map(String::as_str).collect();
        let known: HashSet<&str> = pool.iter().map(|i| i.host_name.as_str()).collect();
        let unresolved: Vec<String> = params
            .host_names
            .iter()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();
        if !unresolved.is_empty() {
            return Err(SelectionError::UnresolvedHosts(unresolved));
        }
        return Ok(pool
            .iter()
            .filter(|i| wanted.contains(i.host_name.as_str()))
            .filter(eligible)
            .cloned()
            .collect());
    }

    let target = target_count(params.count, params.unit, pool.len());
    Ok(pool.iter().filter(eligible).take(target).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pool(n: usize) -> Vec<Instance> {
        (1..=n)
            .map(|i| {
                Instance::new(
                    format!("i-{}", i),
                    "svc",
                    format!("h-{}", i),
                    format!("host-{}", i),
                )
            })
            .collect()
    }

    fn ids(instances: &[Instance]) -> Vec<&str> {
        instances.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_count_selects_pool_prefix() {
        let selected = select(&pool(5), &SelectionParams::count(3)).unwrap();
        assert_eq!(ids(&selected), vec!["i-1", "i-2", "i-3"]);
    }

    #[test]
    fn test_count_larger_than_pool_is_bounded() {
        let selected = select(&pool(2), &SelectionParams::count(5)).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_percentage_rounds_up() {
        assert_eq!(target_count(50, InstanceUnitType::Percentage, 3), 2);
        assert_eq!(target_count(1, InstanceUnitType::Percentage, 3), 1);
        assert_eq!(target_count(100, InstanceUnitType::Percentage, 7), 7);
        assert_eq!(target_count(150, InstanceUnitType::Percentage, 4), 4);
        assert_eq!(target_count(0, InstanceUnitType::Percentage, 4), 0);
        assert_eq!(target_count(10, InstanceUnitType::Percentage, 0), 0);
    }

    #[test]
    fn test_exclusions_are_skipped() {
        let params = SelectionParams::count(8).excluding(["i-1", "i-3", "i-4", "i-6", "i-8"]);
        let selected = select(&pool(8), &params).unwrap();
        assert_eq!(ids(&selected), vec!["i-2", "i-5", "i-7"]);
    }

    #[test]
    fn test_specific_hosts_keep_pool_order() {
        let params = SelectionParams::specific_hosts(["host-4", "host-2"]);
        let selected = select(&pool(5), &params).unwrap();
        assert_eq!(ids(&selected), vec!["i-2", "i-4"]);
    }

    #[test]
    fn test_specific_hosts_must_exist() {
        let params = SelectionParams::specific_hosts(["host-2", "host-10"]);
        assert_eq!(
            select(&pool(3), &params),
            Err(SelectionError::UnresolvedHosts(vec!["host-10".to_string()]))
        );
    }

    #[test]
    fn test_specific_hosts_respect_exclusions() {
        let params = SelectionParams::specific_hosts(["host-1", "host-2"]).excluding(["i-1"]);
        let selected = select(&pool(3), &params).unwrap();
        assert_eq!(ids(&selected), vec!["i-2"]);
    }

    #[test]
    fn test_expand_host_names() {
        let rendered = vec!["host-1, host-2".to_string(), "host-2".to_string(), "host-3".to_string()];
        assert_eq!(expand_host_names(&rendered), vec!["host-1", "host-2", "host-3"]);
    }
}
