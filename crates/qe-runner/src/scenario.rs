//! Scenario plans: named, tagged lists of steps loaded from YAML.

use std::fmt;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use readiness::platform::APP_LABEL;
use readiness::AggregateResult;
use serde::Deserialize;
use serde::Serialize;

/// Tag of scenarios that are not run against product builds.
pub const UPGRADE_TAG: &str = "upgrade";

/// Marker in the platform version of product builds.
const PRODUCT_VERSION_MARKER: &str = "redhat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    CheckReachable,
    Clean,
    WaitReady,
    WaitUndeployed,
    WaitApp {
        #[serde(default = "default_app_label")]
        label: String,
        #[serde(default = "default_app_value")]
        value: String,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    Sleep {
        seconds: u64,
    },
}

fn default_app_label() -> String {
    APP_LABEL.to_string()
}

fn default_app_value() -> String {
    "todo".to_string()
}

fn default_replicas() -> u32 {
    1
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::CheckReachable => f.write_str("check cluster is reachable"),
            Step::Clean => f.write_str("clean namespace"),
            Step::WaitReady => f.write_str("wait for platform to become ready"),
            Step::WaitUndeployed => f.write_str("wait for platform to be undeployed"),
            Step::WaitApp {
                label,
                value,
                replicas,
            } => write!(f, "wait for {replicas} ready pods of {label}={value}"),
            Step::Sleep { seconds } => write!(f, "sleep {seconds}s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        self.tags.iter().any(|t| normalize_tag(t) == tag)
    }

    /// Reason to skip the scenario before running any of its steps.
    pub fn skip_reason(&self, platform_version: Option<&str>) -> Option<String> {
        match platform_version {
            Some(version) if version.contains(PRODUCT_VERSION_MARKER) && self.has_tag(UPGRADE_TAG) => {
                Some(format!("upgrade scenarios are not run against product version {version}"))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Plan {
    pub scenarios: Vec<Scenario>,
}

impl Plan {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid scenario plan")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("failed to load plan {}", path.display()))
    }
}

fn normalize_tag(tag: &str) -> &str {
    tag.trim().trim_start_matches('@')
}

/// Selects scenarios by tag. A leading `@` is ignored on both sides.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl TagFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let clean = |tags: &[String]| -> Vec<String> {
            tags.iter()
                .map(|t| normalize_tag(t).to_string())
                .filter(|t| !t.is_empty())
                .collect()
        };
        Self {
            include: clean(include),
            exclude: clean(exclude),
        }
    }

    /// Selected when the scenario carries one of the included tags (or none
    /// are given) and none of the excluded ones.
    pub fn selects(&self, scenario: &Scenario) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|t| scenario.has_tag(t));
        included && !self.exclude.iter().any(|t| scenario.has_tag(t))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregateResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    pub fn new(step: Step, outcome: Result<Option<AggregateResult>>) -> Self {
        match outcome {
            Ok(Some(result)) => {
                let error = (!result.is_success()).then(|| result.failure_summary());
                Self {
                    step,
                    result: Some(result),
                    error,
                }
            }
            Ok(None) => Self {
                step,
                result: None,
                error: None,
            },
            Err(e) => Self {
                step,
                result: None,
                error: Some(format!("{e:#}")),
            },
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed { step: String, reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub status: ScenarioStatus,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub scenarios: Vec<ScenarioReport>,
}

impl PlanReport {
    pub fn passed(&self) -> bool {
        !self
            .scenarios
            .iter()
            .any(|s| matches!(s.status, ScenarioStatus::Failed { .. }))
    }

    pub fn count(&self, matcher: impl Fn(&ScenarioStatus) -> bool) -> usize {
        self.scenarios.iter().filter(|s| matcher(&s.status)).count()
    }
}
