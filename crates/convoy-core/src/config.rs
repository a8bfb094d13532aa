//! Engine configuration
//!
//! Defaults can be overridden from a YAML document or from `CONVOY_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::domain::step::{StepDefinition, StepType, TimeoutPolicy};
use crate::logging::LoggingConfig;
use crate::scheduling::capacity::LicenseLimits;
use crate::types::PhaseType;
use crate::CoreError;

/// Where the exclude-hosts-with-same-artifact flag comes from for a phase type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactExclusionPolicy {
    /// Read the flag from the run's standard parameters
    #[default]
    FromWorkflowParams,
    /// Always exclude hosts already running the artifact
    Always,
    /// Never exclude
    Never,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default timeout of command steps, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Default timeout of Helm and container steps, in seconds
    #[serde(default = "default_deployment_timeout_secs")]
    pub deployment_timeout_secs: u64,

    /// Default timeout of approval steps, in seconds
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// Concurrent instance ceilings per license tier
    #[serde(default)]
    pub license_limits: LicenseLimits,

    /// Artifact exclusion policy per phase type
    #[serde(default)]
    pub artifact_exclusion: HashMap<PhaseType, ArtifactExclusionPolicy>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_command_timeout_secs() -> u64 {
    30 * 60
}

fn default_deployment_timeout_secs() -> u64 {
    10 * 60
}

fn default_approval_timeout_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            deployment_timeout_secs: default_deployment_timeout_secs(),
            approval_timeout_secs: default_approval_timeout_secs(),
            license_limits: LicenseLimits::default(),
            artifact_exclusion: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self, CoreError> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        read_u64(&lookup, "CONVOY_COMMAND_TIMEOUT_SECS", &mut config.command_timeout_secs);
        read_u64(&lookup, "CONVOY_DEPLOYMENT_TIMEOUT_SECS", &mut config.deployment_timeout_secs);
        read_u64(&lookup, "CONVOY_APPROVAL_TIMEOUT_SECS", &mut config.approval_timeout_secs);

        if let Some(value) = lookup("CONVOY_COMMUNITY_INSTANCE_LIMIT") {
            config.license_limits.community = parse_limit(&value, "CONVOY_COMMUNITY_INSTANCE_LIMIT")
                .unwrap_or(config.license_limits.community);
        }

        if let Some(value) = lookup("CONVOY_ESSENTIALS_INSTANCE_LIMIT") {
            config.license_limits.essentials =
                parse_limit(&value, "CONVOY_ESSENTIALS_INSTANCE_LIMIT")
                    .unwrap_or(config.license_limits.essentials);
        }

        // Format: ssh=always,helm=never
        if let Some(value) = lookup("CONVOY_EXCLUDE_SAME_ARTIFACT") {
            for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                match parse_exclusion_entry(entry) {
                    Some((phase, policy)) => {
                        config.artifact_exclusion.insert(phase, policy);
                    }
                    None => warn!("Invalid CONVOY_EXCLUDE_SAME_ARTIFACT entry: {}", entry),
                }
            }
        }

        if let Some(filter) = lookup("CONVOY_LOG_FILTER").or_else(|| lookup("LOG_LEVEL")) {
            config.logging.log_filter = filter;
        }

        if let Some(json) = lookup("CONVOY_LOG_JSON") {
            config.logging.enable_json_logging = json.eq_ignore_ascii_case("true") || json == "1";
        }

        if let Some(file) = lookup("CONVOY_LOG_FILE") {
            config.logging.log_file = Some(file).filter(|f| !f.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::InvalidInput(format!("Invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_yaml_str(&text)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.approval_timeout_secs == 0 {
            return Err(CoreError::InvalidInput(
                "Approval timeout must be greater than zero".to_string(),
            ));
        }
        if self.deployment_timeout_secs == 0 || self.command_timeout_secs == 0 {
            return Err(CoreError::InvalidInput(
                "Step timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Type-specific default timeout; `None` means unbounded
    pub fn timeout_for(&self, step_type: StepType) -> Option<Duration> {
        match step_type {
            StepType::Command => Some(Duration::from_secs(self.command_timeout_secs)),
            StepType::HelmDeploy | StepType::ContainerRollout => {
                Some(Duration::from_secs(self.deployment_timeout_secs))
            }
            StepType::Approval => Some(Duration::from_secs(self.approval_timeout_secs)),
            StepType::NodeSelect => None,
        }
    }

    /// Timeout the engine enforces for a definition
    pub fn effective_timeout(&self, definition: &StepDefinition) -> Option<Duration> {
        match definition.timeout {
            TimeoutPolicy::Fixed { secs } => Some(Duration::from_secs(secs)),
            TimeoutPolicy::Unbounded => None,
            TimeoutPolicy::Default => self.timeout_for(definition.step_type),
        }
    }

    /// Artifact exclusion policy for a phase type
    pub fn exclusion_policy(&self, phase_type: PhaseType) -> ArtifactExclusionPolicy {
        self.artifact_exclusion
            .get(&phase_type)
            .copied()
            .unwrap_or_default()
    }
}

fn read_u64<F>(lookup: &F, key: &str, target: &mut u64)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        match value.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Invalid {} value: {}", key, value),
        }
    }
}

fn parse_limit(value: &str, key: &str) -> Option<Option<usize>> {
    if value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("unlimited") {
        return Some(None);
    }
    match value.parse::<usize>() {
        Ok(limit) => Some(Some(limit)),
        Err(_) => {
            warn!("Invalid {} value: {}", key, value);
            None
        }
    }
}

fn parse_exclusion_entry(entry: &str) -> Option<(PhaseType, ArtifactExclusionPolicy)> {
    let (phase, policy) = entry.split_once('=')?;
    let phase = match phase.trim().to_ascii_lowercase().as_str() {
        "ssh" => PhaseType::Ssh,
        "winrm" => PhaseType::Winrm,
        "container" => PhaseType::Container,
        "helm" => PhaseType::Helm,
        "custom" => PhaseType::Custom,
        _ => return None,
    };
    let policy = match policy.trim().to_ascii_lowercase().as_str() {
        "always" => ArtifactExclusionPolicy::Always,
        "never" => ArtifactExclusionPolicy::Never,
        "params" | "from_workflow_params" => ArtifactExclusionPolicy::FromWorkflowParams,
        _ => return None,
    };
    Some((phase, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup_from(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(
            config.timeout_for(StepType::Approval),
            Some(Duration::from_secs(7 * 24 * 3600))
        );
        assert_eq!(config.timeout_for(StepType::HelmDeploy), Some(Duration::from_secs(600)));
        assert_eq!(config.timeout_for(StepType::NodeSelect), None);
        assert_eq!(config.license_limits.community, Some(10));
        assert_eq!(
            config.exclusion_policy(PhaseType::Ssh),
            ArtifactExclusionPolicy::FromWorkflowParams
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::load_from(lookup_from(&[
            ("CONVOY_DEPLOYMENT_TIMEOUT_SECS", "120"),
            ("CONVOY_COMMAND_TIMEOUT_SECS", "not-a-number"),
            ("CONVOY_COMMUNITY_INSTANCE_LIMIT", "5"),
            ("CONVOY_EXCLUDE_SAME_ARTIFACT", "helm=always, ssh=never, bogus"),
            ("CONVOY_LOG_JSON", "true"),
        ]))
        .unwrap();

        assert_eq!(config.deployment_timeout_secs, 120);
        assert_eq!(config.command_timeout_secs, 30 * 60);
        assert_eq!(config.license_limits.community, Some(5));
        assert_eq!(config.exclusion_policy(PhaseType::Helm), ArtifactExclusionPolicy::Always);
        assert_eq!(config.exclusion_policy(PhaseType::Ssh), ArtifactExclusionPolicy::Never);
        assert!(config.logging.enable_json_logging);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = EngineConfig::load_from(lookup_from(&[("CONVOY_APPROVAL_TIMEOUT_SECS", "0")]));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_yaml() {
        let config = EngineConfig::from_yaml_str(
            "deployment_timeout_secs: 300\nartifact_exclusion:\n  container: always\n",
        )
        .unwrap();
        assert_eq!(config.deployment_timeout_secs, 300);
        assert_eq!(config.approval_timeout_secs, 7 * 24 * 3600);
        assert_eq!(
            config.exclusion_policy(PhaseType::Container),
            ArtifactExclusionPolicy::Always
        );
    }

    #[test]
    fn test_effective_timeout() {
        let config = EngineConfig::default();
        let def = StepDefinition::new("s", "Approve", StepType::Approval);
        assert_eq!(config.effective_timeout(&def), Some(Duration::from_secs(604_800)));
        let def = def.with_timeout(TimeoutPolicy::Unbounded);
        assert_eq!(config.effective_timeout(&def), None);
    }
}
