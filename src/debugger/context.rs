use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use super::breakpoints::{LineBreakpoint, RobotBreakpointSupplier};
use super::keyword::{KeywordCallType, RunningKeyword};
use super::position::FileRegion;

/// One executable row of a test, user keyword or loop body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Executable {
    Call {
        name: String,
        line: i32,
    },
    ForLoop {
        variables: Vec<String>,
        #[serde(default = "default_loop_flavor")]
        flavor: String,
        #[serde(default)]
        values: Vec<String>,
        line: i32,
        #[serde(default)]
        body: Vec<Executable>,
    },
}

fn default_loop_flavor() -> String {
    "IN".to_string()
}

impl Executable {
    pub fn call(name: impl Into<String>, line: i32) -> Self {
        Self::Call {
            name: name.into(),
            line,
        }
    }

    pub fn line(&self) -> i32 {
        match self {
            Self::Call { line, .. } | Self::ForLoop { line, .. } => *line,
        }
    }

    /// Loop header the way the agent names a running loop, e.g. `${x} IN [ 1 | 2 ]`.
    pub fn loop_header(&self) -> Option<String> {
        match self {
            Self::ForLoop {
                variables,
                flavor,
                values,
                ..
            } => Some(format!(
                "{} {} [ {} ]",
                variables.join(" | "),
                flavor,
                values.join(" | ")
            )),
            Self::Call { .. } => None,
        }
    }
}

/// Executables of a single owner (suite settings, test, user keyword or loop).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutableBody {
    pub path: Option<Url>,
    pub line: i32,
    pub calls: Vec<Executable>,
    pub setup: Option<Executable>,
    pub teardown: Option<Executable>,
}

impl ExecutableBody {
    pub fn new(path: Option<Url>, line: i32) -> Self {
        Self {
            path,
            line,
            ..Self::default()
        }
    }

    pub fn with_calls(mut self, calls: Vec<Executable>) -> Self {
        self.calls = calls;
        self
    }

    pub fn with_setup(mut self, setup: Option<Executable>) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_teardown(mut self, teardown: Option<Executable>) -> Self {
        self.teardown = teardown;
        self
    }

    fn region(&self) -> FileRegion {
        FileRegion::at_line(self.line)
    }

    fn breakpoint_at(
        &self,
        line: i32,
        supplier: &dyn RobotBreakpointSupplier,
    ) -> Option<Arc<LineBreakpoint>> {
        let path = self.path.as_ref()?;
        let line = usize::try_from(line).ok()?;
        supplier.breakpoint_for(path, line)
    }
}

/// Robot keyword names ignore case, spaces and underscores.
pub fn normalize_keyword_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn call_matches(call_name: &str, keyword: &RunningKeyword) -> bool {
    let call = normalize_keyword_name(call_name);
    call == normalize_keyword_name(keyword.name())
        || call == normalize_keyword_name(&keyword.qualified_name())
}

fn loop_matches(header: &str, running: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    squash(header) == squash(running)
}

/// Names of the variables assigned in an iteration named like `${x} = 1, ${y} = 2`.
fn iteration_variables(iteration: &str) -> Vec<String> {
    iteration
        .split(", ")
        .filter_map(|part| part.split_once(" = ").map(|(name, _)| name.trim()))
        .filter(|name| name.starts_with(['$', '@', '&']))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct SuiteContext {
    name: String,
    is_directory: bool,
    body: Arc<ExecutableBody>,
    error: Option<String>,
}

impl SuiteContext {
    pub fn new(name: impl Into<String>, is_directory: bool, body: ExecutableBody) -> Self {
        Self {
            name: name.into(),
            is_directory,
            body: Arc::new(body),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

#[derive(Debug, Clone)]
pub struct TestCaseContext {
    name: String,
    body: Arc<ExecutableBody>,
    error: Option<String>,
}

impl TestCaseContext {
    pub fn new(name: impl Into<String>, body: ExecutableBody) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(body),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct KeywordContext {
    name: String,
    library: bool,
    body: Arc<ExecutableBody>,
    error: Option<String>,
}

impl KeywordContext {
    pub fn user_keyword(name: impl Into<String>, body: ExecutableBody) -> Self {
        Self {
            name: name.into(),
            library: false,
            body: Arc::new(body),
            error: None,
        }
    }

    pub fn library_keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library: true,
            body: Arc::new(ExecutableBody::default()),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_library(&self) -> bool {
        self.library
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPosition {
    Step(usize),
    Setting,
}

/// Position of the currently running call inside its owner's executables.
#[derive(Debug, Clone)]
pub struct ExecutableCallContext {
    body: Arc<ExecutableBody>,
    position: CallPosition,
    region: FileRegion,
    breakpoint: Option<Arc<LineBreakpoint>>,
    error: Option<String>,
    previous: Option<Box<StackFrameContext>>,
}

impl ExecutableCallContext {
    pub fn is_setting_call(&self) -> bool {
        self.position == CallPosition::Setting
    }

    pub fn step_index(&self) -> Option<usize> {
        match self.position {
            CallPosition::Step(index) => Some(index),
            CallPosition::Setting => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForLoopContext {
    body: Arc<ExecutableBody>,
    variables: Vec<String>,
    region: FileRegion,
    breakpoint: Option<Arc<LineBreakpoint>>,
    error: Option<String>,
    previous: Box<StackFrameContext>,
}

impl ForLoopContext {
    pub fn variables(&self) -> &[String] {
        &self.variables
    }
}

#[derive(Debug, Clone)]
pub struct ForLoopIterationContext {
    body: Arc<ExecutableBody>,
    region: FileRegion,
    error: Option<String>,
    previous: Box<StackFrameContext>,
}

/// Context of an element which has no source model attached.
#[derive(Debug, Clone, Default)]
pub struct DefaultContext {
    path: Option<Url>,
    region: Option<FileRegion>,
}

impl DefaultContext {
    pub fn new(path: Option<Url>, region: Option<FileRegion>) -> Self {
        Self { path, region }
    }
}

/// Where in the sources a stack frame currently is.
#[derive(Debug, Clone)]
pub enum StackFrameContext {
    Suite(SuiteContext),
    Test(TestCaseContext),
    Keyword(KeywordContext),
    Call(ExecutableCallContext),
    ForLoop(ForLoopContext),
    ForIteration(ForLoopIterationContext),
    Default(DefaultContext),
}

impl Default for StackFrameContext {
    fn default() -> Self {
        Self::Default(DefaultContext::default())
    }
}

impl StackFrameContext {
    fn body(&self) -> Option<&Arc<ExecutableBody>> {
        match self {
            Self::Suite(c) => Some(&c.body),
            Self::Test(c) => Some(&c.body),
            Self::Keyword(c) => Some(&c.body),
            Self::Call(c) => Some(&c.body),
            Self::ForLoop(c) => Some(&c.body),
            Self::ForIteration(c) => Some(&c.body),
            Self::Default(_) => None,
        }
    }

    pub fn associated_path(&self) -> Option<&Url> {
        match self {
            Self::Default(c) => c.path.as_ref(),
            _ => self.body().and_then(|body| body.path.as_ref()),
        }
    }

    pub fn file_region(&self) -> Option<FileRegion> {
        match self {
            Self::Suite(_) => None,
            Self::Keyword(c) if c.library => None,
            Self::Test(TestCaseContext { body, .. }) | Self::Keyword(KeywordContext { body, .. }) => {
                Some(body.region())
            }
            Self::Call(c) => Some(c.region),
            Self::ForLoop(c) => Some(c.region),
            Self::ForIteration(c) => Some(c.region),
            Self::Default(c) => c.region,
        }
    }

    pub fn line_breakpoint(&self) -> Option<Arc<LineBreakpoint>> {
        match self {
            Self::Call(c) => c.breakpoint.clone(),
            Self::ForLoop(c) => c.breakpoint.clone(),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Suite(c) => c.error.as_deref(),
            Self::Test(c) => c.error.as_deref(),
            Self::Keyword(c) => c.error.as_deref(),
            Self::Call(c) => c.error.as_deref(),
            Self::ForLoop(c) => c.error.as_deref(),
            Self::ForIteration(c) => c.error.as_deref(),
            Self::Default(_) => None,
        }
    }

    pub fn is_erroneous(&self) -> bool {
        self.error_message().is_some()
    }

    pub fn is_library_keyword_context(&self) -> bool {
        matches!(self, Self::Keyword(c) if c.library)
    }

    pub fn is_for_loop_context(&self) -> bool {
        matches!(self, Self::ForLoop(_))
    }

    /// Directory flag of the suite this context was derived from, if it is a suite one.
    pub fn suite_directory(&self) -> Option<bool> {
        match self {
            Self::Suite(c) => Some(c.is_directory),
            Self::Call(ExecutableCallContext {
                previous: Some(previous),
                ..
            }) => previous.suite_directory(),
            _ => None,
        }
    }

    /// Context which becomes current once the keyword that produced this one ends.
    /// Calls inside a body stay in place so the next keyword continues after them.
    pub fn previous_context(self) -> StackFrameContext {
        match self {
            Self::Call(ExecutableCallContext {
                previous: Some(previous),
                ..
            }) => *previous,
            Self::ForLoop(c) => *c.previous,
            Self::ForIteration(c) => *c.previous,
            other => other,
        }
    }

    pub fn move_to(
        self,
        keyword: &RunningKeyword,
        supplier: &dyn RobotBreakpointSupplier,
    ) -> StackFrameContext {
        match &self {
            Self::Default(_) => self,
            Self::Keyword(c) if c.library => self,
            Self::Suite(c) => {
                let body = c.body.clone();
                if keyword.call_type().is_setup() || keyword.call_type().is_teardown() {
                    setting_call(&body, true, keyword, supplier, self)
                } else {
                    missing_call(&body, keyword, String::new())
                }
            }
            Self::Test(TestCaseContext { body, .. })
            | Self::Keyword(KeywordContext { body, .. }) => {
                let body = body.clone();
                next_in_body(&body, 0, keyword, supplier, self)
            }
            Self::ForIteration(c) => {
                let body = c.body.clone();
                next_in_body(&body, 0, keyword, supplier, self)
            }
            Self::Call(c) => match c.position {
                CallPosition::Step(index) => {
                    let body = c.body.clone();
                    next_in_body(&body, index + 1, keyword, supplier, self)
                }
                CallPosition::Setting => {
                    let body = c.body.clone();
                    missing_call(&body, keyword, String::new())
                }
            },
            Self::ForLoop(_) => for_loop_iteration(self, keyword.name()),
        }
    }
}

fn missing_call(
    body: &Arc<ExecutableBody>,
    keyword: &RunningKeyword,
    details: String,
) -> StackFrameContext {
    StackFrameContext::Call(ExecutableCallContext {
        body: body.clone(),
        position: CallPosition::Step(body.calls.len()),
        region: body.region(),
        breakpoint: None,
        error: Some(format!(
            "Unable to find executable call of '{}' keyword\n{}",
            keyword.qualified_name(),
            details
        )),
        previous: None,
    })
}

fn setting_call(
    body: &Arc<ExecutableBody>,
    in_suite: bool,
    keyword: &RunningKeyword,
    supplier: &dyn RobotBreakpointSupplier,
    owner: StackFrameContext,
) -> StackFrameContext {
    let call_type = keyword.call_type();
    let setting_name = call_type.setting_name().unwrap_or("Setup");
    let suite_setting = matches!(
        call_type,
        KeywordCallType::SuiteSetup | KeywordCallType::SuiteTeardown
    );
    let setting = if call_type.is_setup() {
        body.setup.as_ref()
    } else {
        body.teardown.as_ref()
    };

    let (region, breakpoint, error) = match setting {
        Some(Executable::Call { name, line }) if suite_setting == in_suite => {
            if call_matches(name, keyword) {
                (
                    FileRegion::at_line(*line),
                    body.breakpoint_at(*line, supplier),
                    None,
                )
            } else {
                (
                    FileRegion::at_line(*line),
                    None,
                    Some(format!("'{name}' call was found instead\n")),
                )
            }
        }
        _ => (body.region(), None, Some(String::new())),
    };

    StackFrameContext::Call(ExecutableCallContext {
        body: body.clone(),
        position: CallPosition::Setting,
        region,
        breakpoint,
        error: error.map(|details| {
            format!(
                "Unable to find {setting_name} call of '{}' keyword\n{details}",
                keyword.qualified_name()
            )
        }),
        previous: Some(Box::new(owner)),
    })
}

fn next_in_body(
    body: &Arc<ExecutableBody>,
    index: usize,
    keyword: &RunningKeyword,
    supplier: &dyn RobotBreakpointSupplier,
    owner: StackFrameContext,
) -> StackFrameContext {
    let call_type = keyword.call_type();
    if call_type.is_setup() || call_type.is_teardown() {
        if call_type.is_setup() && matches!(owner, StackFrameContext::Call(_)) {
            return setting_call_after_body(body, keyword, owner);
        }
        return setting_call(body, false, keyword, supplier, owner);
    }

    let executable = body.calls.get(index);
    if call_type == KeywordCallType::ForLoop {
        return match executable {
            Some(found @ Executable::ForLoop { line, .. }) => {
                let header = found.loop_header().unwrap_or_default();
                let error = (!loop_matches(&header, keyword.name())).then(|| {
                    format!(
                        "Unable to find matching :FOR loop\n':FOR {header}' was found but ':FOR {}' is being executed\n",
                        keyword.name()
                    )
                });
                let position = body_call(body, index, *line, supplier);
                for_loop(body, found, error, supplier, position)
            }
            Some(Executable::Call { name, line }) => {
                let position = body_call(body, index, *line, supplier);
                erroneous_loop(
                    body,
                    format!("Unable to find matching :FOR loop\n'{name}' call was found instead\n"),
                    position,
                )
            }
            None => {
                let position = missing_call(body, keyword, String::new());
                erroneous_loop(
                    body,
                    "Unable to find matching :FOR loop\n".to_string(),
                    position,
                )
            }
        };
    }

    match executable {
        Some(Executable::Call { name, line }) if call_matches(name, keyword) => {
            body_call(body, index, *line, supplier)
        }
        Some(Executable::Call { name, line }) => {
            StackFrameContext::Call(ExecutableCallContext {
                body: body.clone(),
                position: CallPosition::Step(index),
                region: FileRegion::at_line(*line),
                breakpoint: None,
                error: Some(format!(
                    "Unable to find executable call of '{}' keyword\n'{name}' call was found instead\n",
                    keyword.qualified_name()
                )),
                previous: None,
            })
        }
        Some(Executable::ForLoop { line, .. }) => StackFrameContext::Call(ExecutableCallContext {
            body: body.clone(),
            position: CallPosition::Step(index),
            region: FileRegion::at_line(*line),
            breakpoint: None,
            error: Some(format!(
                "Unable to find executable call of '{}' keyword\n:FOR loop was found instead\n",
                keyword.qualified_name()
            )),
            previous: None,
        }),
        None => missing_call(body, keyword, String::new()),
    }
}

fn setting_call_after_body(
    body: &Arc<ExecutableBody>,
    keyword: &RunningKeyword,
    owner: StackFrameContext,
) -> StackFrameContext {
    let setting_name = keyword.call_type().setting_name().unwrap_or("Setup");
    StackFrameContext::Call(ExecutableCallContext {
        body: body.clone(),
        position: CallPosition::Setting,
        region: body.region(),
        breakpoint: None,
        error: Some(format!(
            "Unable to find {setting_name} call of '{}' keyword\nsetup cannot run once executables of the body have started\n",
            keyword.qualified_name()
        )),
        previous: Some(Box::new(owner)),
    })
}

fn body_call(
    body: &Arc<ExecutableBody>,
    index: usize,
    line: i32,
    supplier: &dyn RobotBreakpointSupplier,
) -> StackFrameContext {
    StackFrameContext::Call(ExecutableCallContext {
        body: body.clone(),
        position: CallPosition::Step(index),
        region: FileRegion::at_line(line),
        breakpoint: body.breakpoint_at(line, supplier),
        error: None,
        previous: None,
    })
}

fn for_loop(
    body: &Arc<ExecutableBody>,
    found: &Executable,
    error: Option<String>,
    supplier: &dyn RobotBreakpointSupplier,
    position: StackFrameContext,
) -> StackFrameContext {
    let Executable::ForLoop {
        variables,
        line,
        body: loop_body,
        ..
    } = found
    else {
        return erroneous_loop(body, "Unable to find matching :FOR loop\n".to_string(), position);
    };
    let loop_body = ExecutableBody::new(body.path.clone(), *line).with_calls(loop_body.clone());
    StackFrameContext::ForLoop(ForLoopContext {
        body: Arc::new(loop_body),
        variables: variables.clone(),
        region: FileRegion::at_line(*line),
        breakpoint: body.breakpoint_at(*line, supplier),
        error,
        previous: Box::new(position),
    })
}

fn erroneous_loop(
    body: &Arc<ExecutableBody>,
    error: String,
    position: StackFrameContext,
) -> StackFrameContext {
    let region = position.file_region().unwrap_or_else(|| body.region());
    let line = region.line().and_then(|l| i32::try_from(l).ok()).unwrap_or(-1);
    StackFrameContext::ForLoop(ForLoopContext {
        body: Arc::new(ExecutableBody::new(body.path.clone(), line)),
        variables: Vec::new(),
        region,
        breakpoint: None,
        error: Some(error),
        previous: Box::new(position),
    })
}

/// Context of a single loop iteration; `current` has to be a loop context (or an
/// iteration of it, which is returned unchanged).
pub fn for_loop_iteration(current: StackFrameContext, iteration: &str) -> StackFrameContext {
    match &current {
        StackFrameContext::ForIteration(_) => current,
        StackFrameContext::ForLoop(l) => {
            let error = if l.error.is_some() {
                Some(format!("No loop found for iteration of '{iteration}'\n"))
            } else {
                let running = iteration_variables(iteration);
                let same = running.len() == l.variables.len()
                    && running
                        .iter()
                        .zip(&l.variables)
                        .all(|(a, b)| a.eq_ignore_ascii_case(b));
                (!same).then(|| {
                    format!(
                        "The loop is iterating with [{}] variables but [{}] were expected\n",
                        running.join(", "),
                        l.variables.join(", ")
                    )
                })
            };
            let (body, region) = (l.body.clone(), l.region);
            StackFrameContext::ForIteration(ForLoopIterationContext {
                body,
                region,
                error,
                previous: Box::new(current),
            })
        }
        other => {
            let body = other
                .body()
                .cloned()
                .unwrap_or_else(|| Arc::new(ExecutableBody::new(other.associated_path().cloned(), -1)));
            let region = other.file_region().unwrap_or_default();
            StackFrameContext::ForIteration(ForLoopIterationContext {
                body,
                region,
                error: Some(
                    "For loop iteration can only be called when already context was moved to for-loop context"
                        .to_string(),
                ),
                previous: Box::new(current),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_names_are_normalized() {
        assert_eq!(normalize_keyword_name("Log Many"), "logmany");
        assert_eq!(normalize_keyword_name("log_many"), "logmany");
        let kw = RunningKeyword::new("BuiltIn", "Log Many", KeywordCallType::NormalCall);
        assert!(call_matches("builtin.log many", &kw));
        assert!(call_matches("LOG_MANY", &kw));
        assert!(!call_matches("Log", &kw));
    }

    #[test]
    fn iteration_names_are_split_into_variables() {
        assert_eq!(iteration_variables("${x} = 1"), vec!["${x}"]);
        assert_eq!(iteration_variables("${y} = 5, ${x} = 1"), vec!["${y}", "${x}"]);
        assert!(iteration_variables("garbage").is_empty());
    }

    #[test]
    fn loop_header_joins_variables_and_values() {
        let exec = Executable::ForLoop {
            variables: vec!["${x}".into()],
            flavor: "IN".into(),
            values: vec!["1".into(), "2".into(), "3".into()],
            line: 4,
            body: vec![],
        };
        assert_eq!(exec.loop_header().unwrap(), "${x} IN [ 1 | 2 | 3 ]");
        assert!(loop_matches("${x} IN [ 1 | 2 | 3 ]", "${x}  IN [ 1 | 2 | 3 ]"));
    }
}
