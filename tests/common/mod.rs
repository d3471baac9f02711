#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use reqtrace::telemetry::CpuTimes;
use reqtrace::{AgentConfig, RequestTelemetry, ResourceSample, ResourceSampler, SampleError};
use tempfile::TempDir;

/// What the next `sample()` call should do.
pub enum Step {
    Ok(ResourceSample),
    Fail,
    Panic,
}

/// Replays a script of samples; once exhausted, returns zeroed samples.
#[derive(Default)]
pub struct ScriptedSampler {
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedSampler {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
        })
    }

    /// Every call returns a zeroed sample.
    pub fn passthrough() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ResourceSampler for ScriptedSampler {
    fn sample(&self) -> Result<ResourceSample, SampleError> {
        match self.steps.lock().pop_front() {
            Some(Step::Ok(s)) => Ok(s),
            Some(Step::Fail) => Err(SampleError::Other("scripted failure".into())),
            Some(Step::Panic) => panic!("scripted sampler panic"),
            None => Ok(ResourceSample::default()),
        }
    }
}

pub fn sample(user: f64, system: f64, rss: u64) -> ResourceSample {
    ResourceSample {
        cpu: CpuTimes { user, system },
        memory_rss: rss,
    }
}

pub fn config(dir: &TempDir) -> AgentConfig {
    AgentConfig {
        handle_signals: false,
        exit_on_signal: false,
        ..AgentConfig::new(dir.path().join("trace.log"), dir.path().join("trace.db"))
    }
}

pub fn agent(dir: &TempDir, sampler: Arc<dyn ResourceSampler>) -> Arc<RequestTelemetry> {
    RequestTelemetry::start_with_sampler(config(dir), sampler).expect("agent starts")
}

pub fn log_lines(dir: &TempDir) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.path().join("trace.log"))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid json line"))
        .collect()
}
