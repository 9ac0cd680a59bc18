use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableScope {
    Global,
    TestSuite,
    TestCase,
    Local,
}

/// Variable identity as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub scope: VariableScope,
}

impl Variable {
    pub fn new(name: impl Into<String>, scope: VariableScope) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableTypedValue {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
}

impl VariableTypedValue {
    pub fn new(type_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
        }
    }
}

/// One scope snapshot as delivered with an agent event, in the order the agent listed it.
pub type ScopedVariables = IndexMap<Variable, VariableTypedValue>;

// Automatic variables known to Robot Framework 3.x. Needs re-checking with every
// Robot release, the vocabulary is not stable across versions.
const GLOBAL_AUTOMATIC: &[&str] = &[
    "${TEMPDIR}",
    "${EXECDIR}",
    "${/}",
    "${:}",
    "${\\n}",
    "${SPACE}",
    "${True}",
    "${False}",
    "${None}",
    "${null}",
    "${EMPTY}",
    "@{EMPTY}",
    "&{EMPTY}",
    "${OUTPUT_DIR}",
    "${OUTPUT_FILE}",
    "${REPORT_FILE}",
    "${LOG_FILE}",
    "${DEBUG_FILE}",
    "${LOG_LEVEL}",
    "${PREV_TEST_NAME}",
    "${PREV_TEST_STATUS}",
    "${PREV_TEST_MESSAGE}",
    "&{OPTIONS}",
];

const SUITE_AUTOMATIC: &[&str] = &[
    "${SUITE_NAME}",
    "${SUITE_SOURCE}",
    "${SUITE_DOCUMENTATION}",
    "&{SUITE_METADATA}",
    "${SUITE_STATUS}",
    "${SUITE_MESSAGE}",
];

const TEST_AUTOMATIC: &[&str] = &[
    "${TEST_NAME}",
    "@{TEST_TAGS}",
    "${TEST_DOCUMENTATION}",
    "${TEST_STATUS}",
    "${TEST_MESSAGE}",
];

const LOCAL_AUTOMATIC: &[&str] = &["${KEYWORD_STATUS}", "${KEYWORD_MESSAGE}"];

pub fn is_automatic(name: &str, scope: VariableScope) -> bool {
    let known = match scope {
        VariableScope::Global => GLOBAL_AUTOMATIC,
        VariableScope::TestSuite => SUITE_AUTOMATIC,
        VariableScope::TestCase => TEST_AUTOMATIC,
        VariableScope::Local => LOCAL_AUTOMATIC,
    };
    known.iter().any(|candidate| candidate.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackFrameVariable {
    scope: VariableScope,
    automatic: bool,
    name: String,
    type_name: String,
    value: Value,
}

impl StackFrameVariable {
    pub fn new(
        scope: VariableScope,
        automatic: bool,
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            scope,
            automatic,
            name: name.into(),
            type_name: type_name.into(),
            value: value.into(),
        }
    }

    fn from_agent(variable: &Variable, typed: &VariableTypedValue, automatic: bool) -> Self {
        Self::new(
            variable.scope,
            automatic,
            variable.name.clone(),
            typed.type_name.clone(),
            typed.value.clone(),
        )
    }

    pub fn scope(&self) -> VariableScope {
        self.scope
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Independent copy of this variable. Values are plain JSON trees so copying
    /// cannot fail; a variable never shares its value with the frame it came from.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    fn same_as(&self, typed: &VariableTypedValue, scope: VariableScope) -> bool {
        self.scope == scope && self.type_name == typed.type_name && self.value == typed.value
    }
}

/// Classification of one snapshot against the previous one, by variable name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackVariablesDelta {
    added: IndexSet<String>,
    changed: IndexSet<String>,
    unchanged: IndexSet<String>,
    removed: IndexSet<String>,
}

impl StackVariablesDelta {
    pub fn is_added(&self, name: &str) -> bool {
        self.added.contains(name)
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    pub fn is_unchanged(&self, name: &str) -> bool {
        self.unchanged.contains(name)
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.removed.contains(name)
    }

    pub fn added(&self) -> impl Iterator<Item = &str> {
        self.added.iter().map(String::as_str)
    }

    pub fn changed(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn unchanged(&self) -> impl Iterator<Item = &str> {
        self.unchanged.iter().map(String::as_str)
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.removed.iter().map(String::as_str)
    }
}

/// Variables visible in a single stack frame, kept in the order they became known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackFrameVariables {
    variables: IndexMap<String, StackFrameVariable>,
}

impl StackFrameVariables {
    pub fn new(variables: IndexMap<String, StackFrameVariable>) -> Self {
        Self { variables }
    }

    pub fn new_non_local_variables(scoped: &ScopedVariables) -> Self {
        let variables = scoped
            .iter()
            .map(|(variable, typed)| {
                let automatic = is_automatic(&variable.name, variable.scope);
                (
                    variable.name.clone(),
                    StackFrameVariable::from_agent(variable, typed, automatic),
                )
            })
            .collect();
        Self { variables }
    }

    /// Variables for a new frame derived from its parent. Locals of the parent are only
    /// carried over when `preserve_locals` is set (loops share their keyword's locals).
    pub fn new_local_variables(parent: &StackFrameVariables, preserve_locals: bool) -> Self {
        let variables = parent
            .variables
            .iter()
            .filter(|(_, var)| preserve_locals || var.scope != VariableScope::Local)
            .map(|(name, var)| (name.clone(), var.copy()))
            .collect();
        Self { variables }
    }

    pub fn variables(&self) -> &IndexMap<String, StackFrameVariable> {
        &self.variables
    }

    pub fn get(&self, name: &str) -> Option<&StackFrameVariable> {
        self.variables.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackFrameVariable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn update(&mut self, incoming: &ScopedVariables) -> StackVariablesDelta {
        let mut delta = StackVariablesDelta::default();

        for (variable, typed) in incoming {
            match self.variables.get(&variable.name) {
                None => {
                    delta.added.insert(variable.name.clone());
                }
                Some(current) if current.same_as(typed, variable.scope) => {
                    delta.unchanged.insert(variable.name.clone());
                }
                Some(_) => {
                    delta.changed.insert(variable.name.clone());
                }
            }
        }
        let incoming_names: HashSet<&str> = incoming.keys().map(|v| v.name.as_str()).collect();
        for name in self.variables.keys() {
            if !incoming_names.contains(name.as_str()) {
                delta.removed.insert(name.clone());
            }
        }

        for name in &delta.removed {
            self.variables.shift_remove(name);
        }
        for (variable, typed) in incoming {
            if delta.changed.contains(&variable.name) {
                let automatic = self
                    .variables
                    .get(&variable.name)
                    .map(StackFrameVariable::is_automatic)
                    .unwrap_or(false);
                self.variables.insert(
                    variable.name.clone(),
                    StackFrameVariable::from_agent(variable, typed, automatic),
                );
            } else if delta.added.contains(&variable.name) {
                let automatic = is_automatic(&variable.name, variable.scope);
                self.variables.insert(
                    variable.name.clone(),
                    StackFrameVariable::from_agent(variable, typed, automatic),
                );
            }
        }
        delta
    }
}

impl<'a> IntoIterator for &'a StackFrameVariables {
    type Item = &'a StackFrameVariable;
    type IntoIter = indexmap::map::Values<'a, String, StackFrameVariable>;

    fn into_iter(self) -> Self::IntoIter {
        self.variables.values()
    }
}
