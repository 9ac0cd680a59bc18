use tracing::warn;

use crate::error::{DebuggerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeywordCallType {
    NormalCall,
    SuiteSetup,
    SuiteTeardown,
    TestSetup,
    TestTeardown,
    ForLoop,
    ForIteration,
}

impl KeywordCallType {
    pub fn is_setup(self) -> bool {
        matches!(self, Self::SuiteSetup | Self::TestSetup)
    }

    pub fn is_teardown(self) -> bool {
        matches!(self, Self::SuiteTeardown | Self::TestTeardown)
    }

    /// Setting name as it appears in a suite file, for setup and teardown calls.
    pub fn setting_name(self) -> Option<&'static str> {
        match self {
            Self::SuiteSetup => Some("Suite Setup"),
            Self::SuiteTeardown => Some("Suite Teardown"),
            Self::TestSetup => Some("Test Setup"),
            Self::TestTeardown => Some("Test Teardown"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningKeyword {
    source_name: String,
    name: String,
    call_type: KeywordCallType,
}

impl RunningKeyword {
    pub fn new(
        source_name: impl Into<String>,
        name: impl Into<String>,
        call_type: KeywordCallType,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            name: name.into(),
            call_type,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call_type(&self) -> KeywordCallType {
        self.call_type
    }

    pub fn qualified_name(&self) -> String {
        if self.source_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.source_name, self.name)
        }
    }

    pub fn is_for_loop(&self) -> bool {
        self.call_type == KeywordCallType::ForLoop
    }

    pub fn is_for_iteration(&self) -> bool {
        self.call_type == KeywordCallType::ForIteration
    }
}

/// Keyword type names differ between Robot releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypesVocabulary {
    /// Robot 2.x: loop iterations are reported as plain keywords.
    Rf29,
    /// Robot 3.0 and newer.
    Rf3,
}

impl TypesVocabulary {
    pub fn for_version(version: &str) -> Self {
        let mut parts = version.trim().split('.').map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse::<u32>()
        });
        match parts.next() {
            Some(Ok(major)) if major < 3 => Self::Rf29,
            Some(Ok(_)) => Self::Rf3,
            _ => {
                warn!(version, "unable to parse robot version; assuming 3.0+ keyword types");
                Self::Rf3
            }
        }
    }
}

/// Turns raw keyword type strings into [`KeywordCallType`], tracking the types of
/// keywords which are currently running.
#[derive(Debug, Clone)]
pub struct KeywordsTypesFixer {
    vocabulary: TypesVocabulary,
    running: Vec<KeywordCallType>,
}

impl KeywordsTypesFixer {
    pub fn new(vocabulary: TypesVocabulary) -> Self {
        Self {
            vocabulary,
            running: Vec::new(),
        }
    }

    pub fn for_version(version: &str) -> Self {
        Self::new(TypesVocabulary::for_version(version))
    }

    pub fn vocabulary(&self) -> TypesVocabulary {
        self.vocabulary
    }

    /// `in_suite` tells whether the keyword is called directly by a suite, which decides
    /// between suite and test setups/teardowns.
    pub fn fix_type(&self, raw_type: &str, in_suite: bool) -> Result<KeywordCallType> {
        let raw = raw_type.trim().to_ascii_lowercase();
        let setup = if in_suite {
            KeywordCallType::SuiteSetup
        } else {
            KeywordCallType::TestSetup
        };
        let teardown = if in_suite {
            KeywordCallType::SuiteTeardown
        } else {
            KeywordCallType::TestTeardown
        };

        let call_type = match self.vocabulary {
            TypesVocabulary::Rf3 => match raw.as_str() {
                "keyword" | "kw" => KeywordCallType::NormalCall,
                "setup" => setup,
                "teardown" => teardown,
                "for" => KeywordCallType::ForLoop,
                "for item" | "foritem" => KeywordCallType::ForIteration,
                _ => return Err(DebuggerError::UnknownKeywordType(raw_type.to_string())),
            },
            TypesVocabulary::Rf29 => match raw.as_str() {
                "keyword" if self.running.last() == Some(&KeywordCallType::ForLoop) => {
                    KeywordCallType::ForIteration
                }
                "keyword" => KeywordCallType::NormalCall,
                "setup" => setup,
                "teardown" => teardown,
                "suite setup" => KeywordCallType::SuiteSetup,
                "suite teardown" => KeywordCallType::SuiteTeardown,
                "test setup" => KeywordCallType::TestSetup,
                "test teardown" => KeywordCallType::TestTeardown,
                "for" | "test for" | "suite for" | "keyword for" => KeywordCallType::ForLoop,
                "for item" | "test foritem" | "suite foritem" | "keyword foritem" => {
                    KeywordCallType::ForIteration
                }
                _ => return Err(DebuggerError::UnknownKeywordType(raw_type.to_string())),
            },
        };
        Ok(call_type)
    }

    pub fn keyword_started(&mut self, call_type: KeywordCallType) {
        self.running.push(call_type);
    }

    pub fn keyword_ended(&mut self) {
        self.running.pop();
    }
}

impl Default for KeywordsTypesFixer {
    fn default() -> Self {
        Self::new(TypesVocabulary::Rf3)
    }
}
