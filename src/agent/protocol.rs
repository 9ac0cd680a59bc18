use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use url::Url;

use crate::debugger::{PausingPoint, ScopedVariables, Variable, VariableScope, VariableTypedValue};

/// Variable as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireVariable {
    pub name: String,
    pub scope: VariableScope,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
}

/// Variable scopes attached to an event, innermost scope first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Vec<WireVariable>>", into = "Vec<Vec<WireVariable>>")]
pub struct VariableFrames(pub Vec<ScopedVariables>);

impl VariableFrames {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[ScopedVariables] {
        &self.0
    }
}

impl From<Vec<Vec<WireVariable>>> for VariableFrames {
    fn from(frames: Vec<Vec<WireVariable>>) -> Self {
        Self(
            frames
                .into_iter()
                .map(|frame| {
                    frame
                        .into_iter()
                        .map(|var| {
                            (
                                Variable::new(var.name, var.scope),
                                VariableTypedValue::new(var.type_name, var.value),
                            )
                        })
                        .collect()
                })
                .collect(),
        )
    }
}

impl From<VariableFrames> for Vec<Vec<WireVariable>> {
    fn from(frames: VariableFrames) -> Self {
        frames
            .0
            .into_iter()
            .map(|frame| {
                frame
                    .into_iter()
                    .map(|(variable, typed)| WireVariable {
                        name: variable.name,
                        scope: variable.scope,
                        type_name: typed.type_name,
                        value: typed.value,
                    })
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEvent {
    #[serde(default)]
    pub python: String,
    pub robot: String,
    #[serde(default)]
    pub protocol: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceImportEvent {
    pub path: Url,
    #[serde(default)]
    pub importer: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteStartedEvent {
    pub name: String,
    #[serde(default)]
    pub path: Option<Url>,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default)]
    pub child_suites: Vec<String>,
    #[serde(default)]
    pub child_tests: Vec<String>,
    #[serde(default)]
    pub variables: VariableFrames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteEndedEvent {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStartedEvent {
    pub name: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub variables: VariableFrames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEndedEvent {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordStartedEvent {
    pub name: String,
    #[serde(rename = "type")]
    pub kw_type: String,
    #[serde(default)]
    pub library: String,
    #[serde(default)]
    pub variables: VariableFrames,
}

impl KeywordStartedEvent {
    pub fn new(name: impl Into<String>, kw_type: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kw_type: kw_type.into(),
            library: library.into(),
            variables: VariableFrames::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordEndedEvent {
    pub name: String,
    #[serde(rename = "type")]
    pub kw_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariablesEvent {
    pub variables: VariableFrames,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShouldContinueEvent {
    pub pausing_point: PausingPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResultEvent {
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ConditionResultEvent {
    /// Evaluation outcome; a missing result counts as an error.
    pub fn outcome(&self) -> Result<bool, String> {
        match (&self.error, self.result) {
            (Some(error), _) => Err(error.clone()),
            (None, Some(result)) => Ok(result),
            (None, None) => Err("condition evaluation returned no result".to_string()),
        }
    }
}

/// One line of the agent event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    Version(VersionEvent),
    ResourceImport(ResourceImportEvent),
    SuiteStarted(SuiteStartedEvent),
    SuiteEnded(SuiteEndedEvent),
    TestStarted(TestStartedEvent),
    TestEnded(TestEndedEvent),
    PreStartKeyword(KeywordStartedEvent),
    StartKeyword(KeywordStartedEvent),
    PreEndKeyword(KeywordEndedEvent),
    EndKeyword(KeywordEndedEvent),
    Variables(VariablesEvent),
    ShouldContinue(ShouldContinueEvent),
    ConditionResult(ConditionResultEvent),
    Paused,
    Closed,
}

/// Decision sent back to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    Continue,
    Pause,
    Resume,
    Terminate,
    Disconnect,
    Interrupt,
    EvaluateCondition(Vec<String>),
    ChangeVariable {
        name: String,
        scope: VariableScope,
        level: usize,
        path: Vec<Value>,
        arguments: Vec<String>,
    },
}

impl ServerResponse {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Terminate => "terminate",
            Self::Disconnect => "disconnect",
            Self::Interrupt => "interrupt",
            Self::EvaluateCondition(_) => "evaluate_condition",
            Self::ChangeVariable { .. } => "change_variable",
        }
    }

    pub fn to_json(&self) -> Value {
        let payload = match self {
            Self::EvaluateCondition(condition) => json!(condition),
            Self::ChangeVariable {
                name,
                scope,
                level,
                path,
                arguments,
            } => {
                let mut change = json!({
                    "name": name,
                    "scope": scope,
                    "level": level,
                    "arguments": arguments,
                });
                if !path.is_empty() {
                    change["path"] = json!(path);
                }
                change
            }
            _ => json!([]),
        };
        let mut response = Map::new();
        response.insert(self.name().to_string(), payload);
        Value::Object(response)
    }
}

impl Serialize for ServerResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
