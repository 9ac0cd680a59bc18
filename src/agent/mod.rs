mod dispatcher;
mod protocol;

pub use dispatcher::{AgentEventDispatcher, DispatchOutcome, JsonLinesResponder, Responder};
pub use protocol::{
    AgentEvent, ConditionResultEvent, KeywordEndedEvent, KeywordStartedEvent,
    ResourceImportEvent, ServerResponse, ShouldContinueEvent, SuiteEndedEvent, SuiteStartedEvent,
    TestEndedEvent, TestStartedEvent, VariableFrames, VariablesEvent, VersionEvent, WireVariable,
};
