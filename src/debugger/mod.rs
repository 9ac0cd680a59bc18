mod breakpoints;
mod builder;
mod context;
mod frame;
mod keyword;
mod locator;
mod position;
mod stacktrace;
mod stepping;
mod variables;

pub use breakpoints::{no_breakpoints, Breakpoints, LineBreakpoint, RobotBreakpointSupplier};
pub use builder::StacktraceBuilder;
pub use context::{
    for_loop_iteration, normalize_keyword_name, DefaultContext, Executable, ExecutableBody,
    ExecutableCallContext, ForLoopContext, ForLoopIterationContext, KeywordContext,
    StackFrameContext, SuiteContext, TestCaseContext,
};
pub use frame::{FrameCategory, FrameId, StackFrame, StackFrameMarker};
pub use keyword::{KeywordCallType, KeywordsTypesFixer, RunningKeyword, TypesVocabulary};
pub use locator::{ElementsLocator, KeywordModel, ModelLocator, SourceFile, SourceModel, TestModel};
pub use position::{FilePosition, FileRegion};
pub use stacktrace::Stacktrace;
pub use stepping::{PausingPoint, SteppingMode};
pub use variables::{
    is_automatic, ScopedVariables, StackFrameVariable, StackFrameVariables, StackVariablesDelta,
    Variable, VariableScope, VariableTypedValue,
};
