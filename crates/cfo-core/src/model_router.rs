//! Model Router for per-task model selection and timeouts
//!
//! Each intelligence-service capability (extraction, classification,
//! synthesis) gets its own model and timeout. Consecutive failures mark a
//! model unhealthy and route to the fallback model until the recovery wait
//! has passed.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/cfo/config/models.toml)
//! 2. Fall back to embedded defaults (compiled into binary)

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/models.toml");

/// Intelligence-service capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Statement text to transaction candidates
    Extraction,
    /// Single transaction to category id
    Classification,
    /// Numeric analysis to alert narrative
    Synthesis,
}

impl TaskType {
    /// Get the config key for this task type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Classification => "classification",
            Self::Synthesis => "synthesis",
        }
    }

    /// Get all task types
    pub fn all() -> &'static [TaskType] {
        &[Self::Extraction, Self::Classification, Self::Synthesis]
    }
}

/// Configuration for a specific task type
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Model for this task, the default model when unset
    pub model: Option<String>,
    /// Timeout for a single call
    pub timeout: Duration,
}

/// Health status of a model
#[derive(Debug, Default)]
struct ModelHealth {
    failures: u32,
    unhealthy_since: Option<Instant>,
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Default model for all task types
    pub default_model: String,
    /// Default timeout
    pub default_timeout: Duration,
    /// Fallback model if primary fails
    pub fallback_model: Option<String>,
    /// Per-task configurations
    pub tasks: HashMap<TaskType, TaskConfig>,
    /// Failure threshold before marking unhealthy
    pub failure_threshold: u32,
    /// Time to wait before retrying unhealthy model
    pub recovery_wait: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_model: "llama3.2".to_string(),
            default_timeout: Duration::from_secs(30),
            fallback_model: None,
            tasks: HashMap::new(),
            failure_threshold: 3,
            recovery_wait: Duration::from_secs(300),
        }
    }
}

/// Model Router for task-based model selection
pub struct ModelRouter {
    config: RouterConfig,
    health: HashMap<String, ModelHealth>,
    config_path: Option<PathBuf>,
}

impl ModelRouter {
    /// Create a new model router with default configuration
    pub fn new() -> Result<Self> {
        let config = load_config(None)?;
        Ok(Self {
            config,
            health: HashMap::new(),
            config_path: default_config_path(),
        })
    }

    /// Create with an explicit configuration (for testing)
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            health: HashMap::new(),
            config_path: None,
        }
    }

    /// Override the default model, keeping per-task settings
    pub fn set_default_model(&mut self, model: &str) {
        self.config.default_model = model.to_string();
    }

    /// Get the model to use for a task type
    pub fn model_for_task(&self, task: TaskType) -> &str {
        if let Some(model) = self.config.tasks.get(&task).and_then(|c| c.model.as_ref()) {
            if self.is_healthy(model) {
                return model;
            }
        }

        if self.is_healthy(&self.config.default_model) {
            return &self.config.default_model;
        }

        if let Some(ref fallback) = self.config.fallback_model {
            if self.is_healthy(fallback) {
                return fallback;
            }
        }

        // Return default even if unhealthy (let it fail)
        &self.config.default_model
    }

    /// Get the timeout for a task
    pub fn timeout_for_task(&self, task: TaskType) -> Duration {
        self.config
            .tasks
            .get(&task)
            .map(|c| c.timeout)
            .unwrap_or(self.config.default_timeout)
    }

    /// Record a successful call
    pub fn record_success(&mut self, model: &str) {
        let health = self.health.entry(model.to_string()).or_default();
        health.failures = 0;
        health.unhealthy_since = None;
    }

    /// Record a failed call, returns true if model is now unhealthy
    pub fn record_failure(&mut self, model: &str) -> bool {
        let threshold = self.config.failure_threshold;
        let health = self.health.entry(model.to_string()).or_default();
        health.failures += 1;
        if health.failures >= threshold && health.unhealthy_since.is_none() {
            health.unhealthy_since = Some(Instant::now());
        }
        health.failures >= threshold
    }

    /// Check if a model is considered healthy
    pub fn is_healthy(&self, model: &str) -> bool {
        match self.health.get(model) {
            Some(health) if health.failures >= self.config.failure_threshold => health
                .unhealthy_since
                .is_some_and(|since| since.elapsed() >= self.config.recovery_wait),
            _ => true,
        }
    }

    /// Get the router configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> Result<()> {
        self.config = load_config(self.config_path.as_ref())?;
        Ok(())
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_config(RouterConfig::default()))
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("cfo").join("config").join("models.toml"))
}

/// Load configuration (override first, then default)
fn load_config(override_path: Option<&PathBuf>) -> Result<RouterConfig> {
    let path = override_path.cloned().or_else(default_config_path);
    let content = match path {
        Some(path) if path.exists() => fs::read_to_string(&path)
            .map_err(|e| Error::InvalidData(format!("Failed to read config: {}", e)))?,
        _ => DEFAULT_CONFIG.to_string(),
    };

    parse_config(&content)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    defaults: Option<RawDefaults>,
    models: Option<HashMap<String, RawTaskConfig>>,
    health: Option<RawHealth>,
}

#[derive(Debug, Deserialize)]
struct RawDefaults {
    model: Option<String>,
    timeout_secs: Option<u64>,
    fallback_model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTaskConfig {
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawHealth {
    failure_threshold: Option<u32>,
    recovery_wait_secs: Option<u64>,
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<RouterConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::InvalidData(format!("Invalid config TOML: {}", e)))?;

    let mut config = RouterConfig::default();

    if let Some(defaults) = raw.defaults {
        if let Some(model) = defaults.model {
            config.default_model = model;
        }
        if let Some(timeout) = defaults.timeout_secs {
            config.default_timeout = Duration::from_secs(timeout);
        }
        if let Some(fallback) = defaults.fallback_model {
            config.fallback_model = Some(fallback);
        }
    }

    if let Some(models) = raw.models {
        for (task_name, task_config) in models {
            let Some(task) = TaskType::all()
                .iter()
                .copied()
                .find(|t| t.as_str() == task_name)
            else {
                continue;
            };

            config.tasks.insert(
                task,
                TaskConfig {
                    model: task_config.model,
                    timeout: task_config
                        .timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(config.default_timeout),
                },
            );
        }
    }

    if let Some(health) = raw.health {
        if let Some(threshold) = health.failure_threshold {
            config.failure_threshold = threshold;
        }
        if let Some(wait) = health.recovery_wait_secs {
            config.recovery_wait = Duration::from_secs(wait);
        }
    }

    Ok(config)
}
