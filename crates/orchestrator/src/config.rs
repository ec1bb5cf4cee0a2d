use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tracing::{debug, warn};
use triad_core::{PlanMetadata, Role};

use crate::context_budget::ContextBudgetConfig;

const CONFIG_DIR: &str = ".triad";
const CONFIG_FILE: &str = "config.json";

static ENV_REFERENCE: OnceLock<Option<regex::Regex>> = OnceLock::new();

fn env_reference() -> Option<&'static regex::Regex> {
    ENV_REFERENCE
        .get_or_init(|| {
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-(.*?))?\}|\$([A-Z_][A-Z0-9_]*)").ok()
        })
        .as_ref()
}

/// Model selection for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ModelSelection {
    /// Provider name as registered in `providers`
    pub provider: String,
    /// Model id understood by that provider
    pub model: String,
}

impl ModelSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

fn default_max_revisions() -> u32 {
    3
}

/// Which model plays which role, plus loop behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    pub planning_model: ModelSelection,
    pub coding_model: ModelSelection,
    pub review_model: ModelSelection,
    /// Skip `plan_review` and go straight from planning to implementing.
    #[serde(default)]
    pub auto_advance: bool,
    /// Advisory: reaching it only logs a warning.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    #[serde(default)]
    pub review_per_task: bool,
    #[serde(default)]
    pub checkpoint_per_task: bool,
    /// Accepted for compatibility; tasks always run one at a time.
    #[serde(default)]
    pub parallel_tasks: bool,
}

impl WorkflowConfig {
    pub fn new(planning: ModelSelection, coding: ModelSelection, review: ModelSelection) -> Self {
        Self {
            planning_model: planning,
            coding_model: coding,
            review_model: review,
            auto_advance: false,
            max_revisions: default_max_revisions(),
            review_per_task: false,
            checkpoint_per_task: false,
            parallel_tasks: false,
        }
    }

    /// Same provider and model for every role.
    pub fn uniform(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let selection = ModelSelection::new(provider, model);
        Self::new(selection.clone(), selection.clone(), selection)
    }

    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn selection(&self, role: Role) -> &ModelSelection {
        match role {
            Role::Planner => &self.planning_model,
            Role::Coder => &self.coding_model,
            Role::Reviewer => &self.review_model,
        }
    }

    pub fn plan_metadata(&self) -> PlanMetadata {
        PlanMetadata {
            planning_model: self.planning_model.to_string(),
            coding_model: self.coding_model.to_string(),
            review_model: self.review_model.to_string(),
            total_revisions: 0,
            max_revisions: self.max_revisions,
        }
    }
}

/// An OpenAI-compatible endpoint and the models it is known to serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
}

impl ProviderConfig {
    pub fn new<I, S>(name: impl Into<String>, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            base_url: None,
            api_key: None,
            models: models.into_iter().map(Into::into).collect(),
            request_timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Project-level configuration stored in .triad/config.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub context: ContextBudgetConfig,
}

impl ProjectConfig {
    pub fn path(project_path: &Path) -> PathBuf {
        project_path.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Read config from project directory
    pub async fn read(project_path: &Path) -> Self {
        let config_path = Self::path(project_path);

        if !config_path.exists() {
            debug!(path = %config_path.display(), "Config file does not exist, using defaults");
            return Self::default();
        }

        match fs::read_to_string(&config_path).await {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => {
                    debug!(path = %config_path.display(), "Config loaded successfully");
                    config
                }
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    /// Parse config JSON, expanding environment references in provider entries.
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        let mut value: Value = serde_json::from_str(content)?;
        if let Some(providers) = value.get_mut("providers") {
            *providers = substitute_env_vars_json(providers.take());
        }
        serde_json::from_value(value)
    }

    /// Write config to project directory
    pub async fn write(&self, project_path: &Path) -> std::io::Result<()> {
        let config_dir = project_path.join(CONFIG_DIR);
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).await?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(&config_path, content).await?;
        debug!(path = %config_path.display(), "Config saved successfully");

        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Expand `${VAR}`, `${VAR:-default}` and `$VAR` from the process environment.
///
/// Unset variables without a default become the empty string.
pub fn substitute_env_vars(input: &str) -> String {
    let Some(re) = env_reference() else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex::Captures| {
        let Some(name) = caps.get(1).or_else(|| caps.get(3)).map(|m| m.as_str()) else {
            return String::new();
        };

        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    warn!(variable = name, "Environment variable not set, using empty string");
                    String::new()
                }
            },
        }
    })
    .into_owned()
}

fn substitute_env_vars_json(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(substitute_env_vars_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env_vars_json(v)))
                .collect(),
        ),
        other => other,
    }
}
