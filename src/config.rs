use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::controller::DebuggerPreferences;
use crate::debugger::{Breakpoints, LineBreakpoint};
use crate::error::{DebuggerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointConfig {
    /// File uri, or a file path (relative ones are resolved against the launch file).
    pub path: String,
    pub line: usize,
    #[serde(default = "default_hit_count")]
    pub hit_count: u32,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_condition_enabled")]
    pub condition_enabled: bool,
}

fn default_hit_count() -> u32 {
    1
}

fn default_condition_enabled() -> bool {
    true
}

/// Launch options of a debugging session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    #[serde(default)]
    pub pause_on_error: bool,
    #[serde(default)]
    pub go_into_library_keywords: bool,
    #[serde(default)]
    pub breakpoints: Vec<BreakpointConfig>,
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub model: Option<PathBuf>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_json(&fs::read_to_string(path)?)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        debug!(
            path = %path.display(),
            breakpoints = config.breakpoints.len(),
            "launch configuration loaded"
        );
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Source model file, resolved against the launch file location.
    pub fn model_path(&self) -> Option<PathBuf> {
        self.model.as_deref().map(|model| self.resolve(model))
    }

    pub fn debugger_preferences(&self) -> DebuggerPreferences {
        DebuggerPreferences::fixed(self.pause_on_error, self.go_into_library_keywords)
    }

    fn breakpoint_url(&self, path: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(path) {
            // single letters are windows drive prefixes, not schemes
            if url.scheme().len() > 1 {
                return Ok(url);
            }
        }
        let resolved = self.resolve(Path::new(path));
        Url::from_file_path(&resolved).map_err(|()| DebuggerError::BreakpointPath(path.to_string()))
    }

    pub fn breakpoints(&self) -> Result<Breakpoints> {
        let breakpoints = Breakpoints::new();
        for config in &self.breakpoints {
            let mut breakpoint = LineBreakpoint::new(self.breakpoint_url(&config.path)?, config.line)
                .with_hit_count(config.hit_count);
            if let Some(condition) = &config.condition {
                breakpoint = breakpoint.with_condition(condition.clone(), config.condition_enabled);
            }
            breakpoints.add(breakpoint);
        }
        Ok(breakpoints)
    }
}
