//! Deployable instances and selection requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A deployable target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    /// Unique id
    pub id: String,
    /// Owning service
    pub service_id: String,
    /// Host identifier
    pub host_id: String,
    /// Display name, used to resolve specific hosts
    pub host_name: String,
}

impl Instance {
    /// Create an instance
    pub fn new(
        id: impl Into<String>,
        service_id: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_id: service_id.into(),
            host_id: host_id.into(),
            host_name: host_name.into(),
        }
    }
}

/// Unit of the requested instance count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceUnitType {
    /// Absolute number of instances
    #[default]
    Count,
    /// Percentage of the pool
    Percentage,
}

/// Request to the node selection scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SelectionParams {
    /// Desired count, interpreted through `unit`
    pub count: u32,
    /// Unit of `count`
    pub unit: InstanceUnitType,
    /// Ignore count and select only `host_names`
    pub select_specific_hosts: bool,
    /// Display names of the explicitly requested hosts
    pub host_names: Vec<String>,
    /// Instance ids never to select
    pub excluded_instance_ids: BTreeSet<String>,
}

impl SelectionParams {
    /// Select `count` instances
    pub fn count(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// Select `percent` of the pool
    pub fn percentage(percent: u32) -> Self {
        Self {
            count: percent,
            unit: InstanceUnitType::Percentage,
            ..Self::default()
        }
    }

    /// Select exactly the named hosts
    pub fn specific_hosts<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let host_names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self {
            count: host_names.len() as u32,
            select_specific_hosts: true,
            host_names,
            ..Self::default()
        }
    }

    /// Request covering every instance of an infrastructure, used to fetch the pool
    pub fn all_instances() -> Self {
        Self::percentage(100)
    }

    /// Exclude instance ids
    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_instance_ids
            .extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Instance as published to downstream steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceElement {
    /// Instance id
    pub instance_id: String,
    /// Host display name
    pub host_name: String,
    /// Host identifier
    pub host_id: String,
    /// True when this phase deploys to the instance
    pub is_new_instance: bool,
}

impl InstanceElement {
    /// Build from an instance
    pub fn from_instance(instance: &Instance, is_new_instance: bool) -> Self {
        Self {
            instance_id: instance.id.clone(),
            host_name: instance.host_name.clone(),
            host_id: instance.host_id.clone(),
            is_new_instance,
        }
    }
}

/// Provisioning style of an infrastructure mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InfraKind {
    /// Static physical or SSH hosts
    Physical,
    /// Cloud hosts matched by filters
    CloudFiltered,
    /// Cloud auto scale group provisioned by the deployment
    AutoScaleGroup {
        /// Name of the auto scale group
        group_name: Option<String>,
    },
}

/// Infrastructure a phase deploys into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraMapping {
    /// Id
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Provisioning style
    pub kind: InfraKind,
}
