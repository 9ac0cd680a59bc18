use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use url::Url;

use super::breakpoints::RobotBreakpointSupplier;
use super::context::{for_loop_iteration, StackFrameContext};
use super::frame::{FrameCategory, StackFrame};
use super::keyword::{KeywordsTypesFixer, RunningKeyword};
use super::locator::ElementsLocator;
use super::stacktrace::Stacktrace;
use super::variables::{ScopedVariables, StackFrameVariables};
use crate::agent::{
    KeywordEndedEvent, KeywordStartedEvent, ResourceImportEvent, SuiteEndedEvent,
    SuiteStartedEvent, TestEndedEvent, TestStartedEvent, VariableFrames, VariablesEvent,
    VersionEvent,
};
use crate::error::Result;

/// Rebuilds the remote call stack from the agent's lifecycle events.
pub struct StacktraceBuilder {
    stack: Arc<Mutex<Stacktrace>>,
    locator: Arc<dyn ElementsLocator>,
    breakpoints: Arc<dyn RobotBreakpointSupplier>,
    fixer: KeywordsTypesFixer,
    pending_resources: IndexMap<Url, Vec<Url>>,
    pending_keyword: Option<RunningKeyword>,
}

/// Scopes in stack order: index 0 holds globals, index `level + 1` the frame at `level`.
fn in_stack_order(frames: &VariableFrames) -> Vec<&ScopedVariables> {
    frames.as_slice().iter().rev().collect()
}

fn next_level(stack: &Stacktrace) -> usize {
    stack
        .peek_current_frame()
        .map_or(0, |frame| frame.level() + 1)
}

fn current_suite_path(stack: &Stacktrace) -> Option<Url> {
    stack
        .iter()
        .find(|frame| frame.is_suite_context())
        .and_then(StackFrame::context_path)
        .cloned()
}

fn derived_variables(parent: Option<&StackFrame>, preserve_locals: bool) -> StackFrameVariables {
    parent
        .and_then(StackFrame::variables)
        .map(|vars| StackFrameVariables::new_local_variables(vars, preserve_locals))
        .unwrap_or_default()
}

impl StacktraceBuilder {
    pub fn new(
        stack: Arc<Mutex<Stacktrace>>,
        locator: Arc<dyn ElementsLocator>,
        breakpoints: Arc<dyn RobotBreakpointSupplier>,
    ) -> Self {
        Self {
            stack,
            locator,
            breakpoints,
            fixer: KeywordsTypesFixer::default(),
            pending_resources: IndexMap::new(),
            pending_keyword: None,
        }
    }

    pub fn stacktrace(&self) -> Arc<Mutex<Stacktrace>> {
        self.stack.clone()
    }

    pub fn keywords_types_fixer(&self) -> &KeywordsTypesFixer {
        &self.fixer
    }

    pub fn handle_version(&mut self, event: &VersionEvent) {
        self.fixer = KeywordsTypesFixer::for_version(&event.robot);
        debug!(
            robot = %event.robot,
            python = %event.python,
            protocol = event.protocol,
            vocabulary = ?self.fixer.vocabulary(),
            "agent versions received"
        );
    }

    pub fn handle_resource_import(&mut self, event: &ResourceImportEvent) -> Result<()> {
        let mut stack = self.stack.lock();
        match &event.importer {
            None => match stack.iter_mut().find(|frame| frame.is_suite_context()) {
                Some(suite) => suite.add_loaded_resource(event.path.clone())?,
                None => warn!(path = %event.path, "resource imported while no suite is running"),
            },
            Some(importer) => {
                let running = stack.iter_mut().find(|frame| {
                    frame.is_suite_context() && frame.context_path() == Some(importer)
                });
                match running {
                    Some(suite) => suite.add_loaded_resource(event.path.clone())?,
                    None => self
                        .pending_resources
                        .entry(importer.clone())
                        .or_default()
                        .push(event.path.clone()),
                }
            }
        }
        trace!(path = %event.path, "resource import handled");
        Ok(())
    }

    pub fn handle_suite_started(&mut self, event: &SuiteStartedEvent) {
        let mut stack = self.stack.lock();
        let scopes = in_stack_order(&event.variables);

        if stack.is_empty() {
            if let Some(globals) = scopes.first() {
                stack.set_global_variables(StackFrameVariables::new_non_local_variables(globals));
            }
        }

        let level = next_level(&stack);
        let parent_suite = current_suite_path(&stack);
        let context = self.locator.find_context_for_suite(
            &event.name,
            event.path.as_ref(),
            event.is_directory,
            parent_suite.as_ref(),
        );
        let variables = match scopes.get(level + 1) {
            Some(scope) => StackFrameVariables::new_non_local_variables(scope),
            None => derived_variables(stack.peek_current_frame(), false),
        };
        let resources = event
            .path
            .as_ref()
            .and_then(|path| self.pending_resources.shift_remove(path))
            .unwrap_or_default();

        let frame = StackFrame::new(event.name.clone(), FrameCategory::Suite, level, context)
            .with_fallback_path(event.path.clone())
            .with_loaded_resources(resources)
            .with_variables(variables);
        debug!(suite = %event.name, level, "suite frame pushed");
        stack.push(frame);
    }

    pub fn handle_suite_ended(&mut self, event: &SuiteEndedEvent) {
        self.stack.lock().pop();
        debug!(suite = %event.name, status = ?event.status, "suite frame popped");
    }

    pub fn handle_test_started(&mut self, event: &TestStartedEvent) {
        let mut stack = self.stack.lock();
        let scopes = in_stack_order(&event.variables);

        let level = next_level(&stack);
        let suite_path = current_suite_path(&stack);
        let context = self.locator.find_context_for_test_case(
            &event.name,
            suite_path.as_ref(),
            event.template.as_deref(),
        );
        let mut variables = derived_variables(stack.peek_current_frame(), false);
        if let Some(scope) = scopes.get(level + 1) {
            variables.update(scope);
        }

        let frame = StackFrame::new(event.name.clone(), FrameCategory::Test, level, context)
            .with_fallback_path(suite_path)
            .with_variables(variables);
        debug!(test = %event.name, level, "test frame pushed");
        stack.push(frame);
    }

    pub fn handle_test_ended(&mut self, event: &TestEndedEvent) {
        self.stack.lock().pop();
        debug!(test = %event.name, status = ?event.status, "test frame popped");
    }

    fn running_keyword(&self, stack: &Stacktrace, event: &KeywordStartedEvent) -> Result<RunningKeyword> {
        let in_suite = stack.has_category_on_top(FrameCategory::Suite);
        let call_type = self.fixer.fix_type(&event.kw_type, in_suite)?;
        Ok(RunningKeyword::new(
            event.library.clone(),
            event.name.clone(),
            call_type,
        ))
    }

    pub fn handle_keyword_about_to_start(&mut self, event: &KeywordStartedEvent) -> Result<()> {
        let mut stack = self.stack.lock();
        let keyword = self.running_keyword(&stack, event)?;

        if !event.variables.is_empty() {
            stack.update_variables(event.variables.as_slice());
        }
        if let Some(top) = stack.peek_current_frame_mut() {
            top.move_to_keyword(&keyword, self.breakpoints.as_ref());
            trace!(frame = %top, keyword = %keyword.qualified_name(), "context moved");
        }
        self.pending_keyword = Some(keyword);
        Ok(())
    }

    pub fn handle_keyword_started(&mut self, event: &KeywordStartedEvent) -> Result<()> {
        let mut stack = self.stack.lock();
        let keyword = match self.pending_keyword.take() {
            Some(pending) if pending.name() == event.name => pending,
            _ => self.running_keyword(&stack, event)?,
        };
        self.fixer.keyword_started(keyword.call_type());

        let frame = if keyword.is_for_loop() {
            self.for_loop_frame(&stack, &keyword)
        } else if stack.has_category_on_top(FrameCategory::For) {
            self.for_iteration_frame(&stack, &keyword)
        } else {
            self.keyword_frame(&stack, &keyword, &event.variables)
        };
        debug!(frame = %frame, "keyword frame pushed");
        stack.push(frame);
        Ok(())
    }

    fn for_loop_frame(&self, stack: &Stacktrace, keyword: &RunningKeyword) -> StackFrame {
        let top = stack.peek_current_frame();
        let level = top.map_or(0, StackFrame::level);
        let context = stack
            .iter()
            .find(|frame| frame.context().is_for_loop_context())
            .map(|frame| frame.context().clone())
            .unwrap_or_default();
        StackFrame::new(format!(":FOR {}", keyword.name()), FrameCategory::For, level, context)
            .with_fallback_path(top.and_then(StackFrame::context_path).cloned())
            .with_variables(derived_variables(top, true))
    }

    fn for_iteration_frame(&self, stack: &Stacktrace, keyword: &RunningKeyword) -> StackFrame {
        let top = stack.peek_current_frame();
        let level = top.map_or(0, StackFrame::level);
        let context = for_loop_iteration(
            top.map(|frame| frame.context().clone()).unwrap_or_default(),
            keyword.name(),
        );
        StackFrame::new(
            format!(":FOR iteration {}", keyword.name()),
            FrameCategory::ForItem,
            level,
            context,
        )
        .with_fallback_path(top.and_then(StackFrame::context_path).cloned())
        .with_variables(derived_variables(top, true))
    }

    fn keyword_frame(
        &self,
        stack: &Stacktrace,
        keyword: &RunningKeyword,
        event_variables: &VariableFrames,
    ) -> StackFrame {
        let suite_path = current_suite_path(stack);
        let context: StackFrameContext = self.locator.find_context_for_keyword(
            keyword.source_name(),
            keyword.name(),
            suite_path.as_ref(),
            &stack.loaded_resources(),
        );

        let (level, variables) = if context.is_library_keyword_context() {
            // the agent keeps no scope for library keywords, they share the enclosing test or suite one
            let anchor = stack
                .iter()
                .find(|frame| frame.is_test_context() || frame.is_suite_context());
            (
                anchor.map_or(0, StackFrame::level),
                derived_variables(anchor, true),
            )
        } else {
            let level = next_level(stack);
            let mut variables = derived_variables(stack.peek_current_frame(), false);
            if let Some(scope) = in_stack_order(event_variables).get(level + 1) {
                variables.update(scope);
            }
            (level, variables)
        };

        StackFrame::new(keyword.qualified_name(), FrameCategory::Keyword, level, context)
            .with_fallback_path(suite_path)
            .with_variables(variables)
    }

    pub fn handle_keyword_about_to_end(&mut self, event: &KeywordEndedEvent) {
        let popped = self.stack.lock().pop();
        trace!(keyword = %event.name, popped = popped.is_some(), "keyword frame popped");
    }

    pub fn handle_keyword_ended(&mut self, event: &KeywordEndedEvent) {
        if let Some(top) = self.stack.lock().peek_current_frame_mut() {
            top.move_out_of_keyword();
        }
        self.fixer.keyword_ended();
        trace!(keyword = %event.name, "keyword ended");
    }

    pub fn handle_variables(&mut self, event: &VariablesEvent) {
        if let Some(error) = &event.error {
            warn!(%error, "agent reported variables error");
        }
        self.stack.lock().update_variables(event.variables.as_slice());
    }

    pub fn handle_closed(&mut self) {
        self.stack.lock().destroy();
        self.pending_resources.clear();
        self.pending_keyword = None;
        debug!("agent connection closed; stacktrace destroyed");
    }
}
