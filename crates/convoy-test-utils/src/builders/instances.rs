//! Instance pools and infrastructure mappings.

use convoy_core::domain::instance::{InfraKind, InfraMapping, Instance};

/// A pool of `size` instances named `i-000`, `i-001`, ... on hosts
/// `host-000`, `host-001`, ...
pub fn instance_pool(size: usize) -> Vec<Instance> {
    (0..size)
        .map(|i| {
            Instance::new(
                format!("i-{:03}", i),
                "svc",
                format!("h-{:03}", i),
                format!("host-{:03}", i),
            )
        })
        .collect()
}

/// Ids of instances
pub fn instance_ids(instances: &[Instance]) -> Vec<String> {
    instances.iter().map(|i| i.id.clone()).collect()
}

/// Static host infrastructure
pub fn physical_infra(id: &str) -> InfraMapping {
    InfraMapping {
        id: id.to_string(),
        name: Some(format!("{}-hosts", id)),
        kind: InfraKind::Physical,
    }
}

/// Filter-matched cloud infrastructure
pub fn cloud_infra(id: &str) -> InfraMapping {
    InfraMapping {
        id: id.to_string(),
        name: Some(format!("{}-cloud", id)),
        kind: InfraKind::CloudFiltered,
    }
}

/// Auto scale group infrastructure
pub fn auto_scale_infra(id: &str, group_name: &str) -> InfraMapping {
    InfraMapping {
        id: id.to_string(),
        name: Some(format!("{}-asg", id)),
        kind: InfraKind::AutoScaleGroup {
            group_name: Some(group_name.to_string()),
        },
    }
}
