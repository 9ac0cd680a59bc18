use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use url::Url;

use super::breakpoints::{LineBreakpoint, RobotBreakpointSupplier};
use super::context::StackFrameContext;
use super::keyword::RunningKeyword;
use super::position::FileRegion;
use super::variables::{ScopedVariables, StackFrameVariables, StackVariablesDelta};
use crate::error::{DebuggerError, Result};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a frame for as long as it stays on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        Self(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCategory {
    Suite,
    Test,
    Keyword,
    For,
    ForItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackFrameMarker {
    Stepping,
    Error,
}

#[derive(Debug)]
pub struct StackFrame {
    id: FrameId,
    name: String,
    category: FrameCategory,
    level: usize,
    context: StackFrameContext,
    original_error: Option<String>,
    fallback_path: Option<Url>,
    loaded_resources: IndexSet<Url>,
    variables: Option<StackFrameVariables>,
    last_delta: Option<StackVariablesDelta>,
    markers: IndexSet<StackFrameMarker>,
}

impl StackFrame {
    pub fn new(
        name: impl Into<String>,
        category: FrameCategory,
        level: usize,
        context: StackFrameContext,
    ) -> Self {
        let original_error = context
            .error_message()
            .filter(|msg| !msg.is_empty())
            .map(str::to_string);
        Self {
            id: FrameId::next(),
            name: name.into(),
            category,
            level,
            context,
            original_error,
            fallback_path: None,
            loaded_resources: IndexSet::new(),
            variables: None,
            last_delta: None,
            markers: IndexSet::new(),
        }
    }

    /// Path used when the context itself has none, usually the enclosing suite file.
    pub fn with_fallback_path(mut self, path: Option<Url>) -> Self {
        self.fallback_path = path;
        self
    }

    pub fn with_loaded_resources(mut self, resources: impl IntoIterator<Item = Url>) -> Self {
        self.loaded_resources.extend(resources);
        self
    }

    pub fn with_variables(mut self, variables: StackFrameVariables) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> FrameCategory {
        self.category
    }

    pub fn has_category(&self, category: FrameCategory) -> bool {
        self.category == category
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn context(&self) -> &StackFrameContext {
        &self.context
    }

    pub fn loaded_resources(&self) -> impl Iterator<Item = &Url> {
        self.loaded_resources.iter()
    }

    pub fn add_loaded_resource(&mut self, path: Url) -> Result<()> {
        if self.category != FrameCategory::Suite {
            return Err(DebuggerError::NonSuiteResource);
        }
        self.loaded_resources.insert(path);
        Ok(())
    }

    pub fn context_path(&self) -> Option<&Url> {
        self.context
            .associated_path()
            .or(self.fallback_path.as_ref())
    }

    pub fn current_source_path(&self) -> Option<&Url> {
        self.context.associated_path()
    }

    pub fn file_region(&self) -> Option<FileRegion> {
        self.context.file_region()
    }

    pub fn breakpoint(&self) -> Option<Arc<LineBreakpoint>> {
        self.context.line_breakpoint()
    }

    pub fn is_erroneous(&self) -> bool {
        self.original_error.is_some() || self.context.is_erroneous()
    }

    pub fn error_message(&self) -> Option<String> {
        let current = self.context.error_message().filter(|msg| !msg.is_empty());
        match (self.original_error.as_deref(), current) {
            (Some(original), Some(current)) if original == current => Some(original.to_string()),
            (Some(original), Some(current)) => Some(format!("{original}{current}")),
            (Some(original), None) => Some(original.to_string()),
            (None, Some(current)) => Some(current.to_string()),
            (None, None) => None,
        }
    }

    pub fn is_suite_context(&self) -> bool {
        self.category == FrameCategory::Suite
    }

    pub fn is_suite_file_context(&self) -> bool {
        self.is_suite_context() && self.context.suite_directory() == Some(false)
    }

    pub fn is_suite_directory_context(&self) -> bool {
        self.is_suite_context() && self.context.suite_directory() == Some(true)
    }

    pub fn is_test_context(&self) -> bool {
        self.category == FrameCategory::Test
    }

    pub fn is_library_keyword_frame(&self) -> bool {
        self.category == FrameCategory::Keyword && self.context.is_library_keyword_context()
    }

    pub fn move_to_keyword(
        &mut self,
        keyword: &RunningKeyword,
        supplier: &dyn RobotBreakpointSupplier,
    ) {
        let current = mem::take(&mut self.context);
        self.context = current.move_to(keyword, supplier);
    }

    pub fn move_out_of_keyword(&mut self) {
        let current = mem::take(&mut self.context);
        self.context = current.previous_context();
    }

    pub fn variables(&self) -> Option<&StackFrameVariables> {
        self.variables.as_ref()
    }

    /// Installs the variables of a frame which has none yet. Variables already set are kept.
    pub fn set_variables(&mut self, variables: StackFrameVariables) {
        if self.variables.is_none() {
            self.variables = Some(variables);
        }
    }

    pub fn update_variables(&mut self, incoming: &ScopedVariables) {
        let delta = match self.variables.as_mut() {
            Some(variables) => variables.update(incoming),
            None => {
                self.variables = Some(StackFrameVariables::new_non_local_variables(incoming));
                StackVariablesDelta::default()
            }
        };
        self.last_delta = Some(delta);
    }

    pub fn last_delta(&self) -> Option<&StackVariablesDelta> {
        self.last_delta.as_ref()
    }

    pub fn mark(&mut self, marker: StackFrameMarker) {
        self.markers.insert(marker);
    }

    pub fn unmark(&mut self, marker: StackFrameMarker) {
        self.markers.shift_remove(&marker);
    }

    pub fn is_marked_stepping(&self) -> bool {
        self.markers.contains(&StackFrameMarker::Stepping)
    }

    pub fn is_marked_error(&self) -> bool {
        self.markers.contains(&StackFrameMarker::Error)
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.name)?;
        if let Some(line) = self.file_region().and_then(|region| region.line()) {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}
