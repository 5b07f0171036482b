use std::time::Duration;

use serde::Serialize;

use crate::config::HarnessConfig;
use crate::keys::KeyName;

/// What a marker proves when it shows up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    /// The guest booted to its shell prompt.
    Boot,
    /// The typed command produced output.
    CommandOutput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerWait {
    pub milestone: Milestone,
    pub marker: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioStep {
    WaitForMarker(MarkerWait),
    SendKeys(Vec<KeyName>),
}

/// The ordered steps of one run. Always boot, type, check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            steps: vec![
                ScenarioStep::WaitForMarker(MarkerWait {
                    milestone: Milestone::Boot,
                    marker: config.boot_marker.clone(),
                    timeout: config.boot_timeout,
                }),
                ScenarioStep::SendKeys(config.key_sequence.clone()),
                ScenarioStep::WaitForMarker(MarkerWait {
                    milestone: Milestone::CommandOutput,
                    marker: config.result_marker.clone(),
                    timeout: config.result_timeout,
                }),
            ],
        }
    }

    pub fn steps(&self) -> &[ScenarioStep] {
        &self.steps
    }
}
