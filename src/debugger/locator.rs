use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::context::{
    normalize_keyword_name, Executable, ExecutableBody, KeywordContext, StackFrameContext,
    SuiteContext, TestCaseContext,
};
use crate::error::Result;

/// Maps elements reported by the agent onto local sources.
pub trait ElementsLocator: Send + Sync {
    fn find_context_for_suite(
        &self,
        name: &str,
        path: Option<&Url>,
        is_directory: bool,
        current_suite: Option<&Url>,
    ) -> StackFrameContext;

    fn find_context_for_test_case(
        &self,
        name: &str,
        current_suite: Option<&Url>,
        template: Option<&str>,
    ) -> StackFrameContext;

    fn find_context_for_keyword(
        &self,
        source_name: &str,
        name: &str,
        current_suite: Option<&Url>,
        loaded_resources: &[Url],
    ) -> StackFrameContext;

    /// Local counterpart of a path seen by the remote process.
    fn translate_path(&self, path: &Url, _is_directory: bool) -> Option<Url> {
        Some(path.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestModel {
    pub name: String,
    pub line: i32,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub setup: Option<Executable>,
    #[serde(default)]
    pub teardown: Option<Executable>,
    #[serde(default)]
    pub body: Vec<Executable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordModel {
    pub name: String,
    pub line: i32,
    #[serde(default)]
    pub teardown: Option<Executable>,
    #[serde(default)]
    pub body: Vec<Executable>,
}

/// A suite file, a directory's init file or a resource file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub path: Url,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub setup: Option<Executable>,
    #[serde(default)]
    pub teardown: Option<Executable>,
    #[serde(default)]
    pub test_setup: Option<Executable>,
    #[serde(default)]
    pub test_teardown: Option<Executable>,
    #[serde(default)]
    pub tests: Vec<TestModel>,
    #[serde(default)]
    pub keywords: Vec<KeywordModel>,
    #[serde(default)]
    pub resources: Vec<Url>,
}

impl SourceFile {
    fn stem(&self) -> Option<String> {
        let segment = self.path.path_segments()?.filter(|s| !s.is_empty()).last()?;
        let stem = segment.rsplit_once('.').map_or(segment, |(stem, _)| stem);
        Some(stem.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceModel {
    #[serde(default)]
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub libraries: Vec<String>,
}

/// Locator working on a source model loaded up front.
#[derive(Debug, Clone, Default)]
pub struct ModelLocator {
    model: SourceModel,
}

impl ModelLocator {
    pub fn new(model: SourceModel) -> Self {
        Self { model }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let locator = Self::from_json(&content)?;
        debug!(
            path = %path.as_ref().display(),
            files = locator.model.files.len(),
            "source model loaded"
        );
        Ok(locator)
    }

    fn file(&self, path: &Url) -> Option<&SourceFile> {
        self.model.files.iter().find(|file| &file.path == path)
    }

    fn is_library(&self, source_name: &str) -> bool {
        self.model
            .libraries
            .iter()
            .any(|lib| lib.eq_ignore_ascii_case(source_name))
    }

    fn is_known_source(&self, source_name: &str) -> bool {
        self.model
            .files
            .iter()
            .filter_map(SourceFile::stem)
            .any(|stem| stem.eq_ignore_ascii_case(source_name))
    }

    /// Directory init files above the given suite, nearest one first.
    fn init_files_above(&self, suite: &Url) -> Vec<&SourceFile> {
        let mut inits: Vec<&SourceFile> = self
            .model
            .files
            .iter()
            .filter(|file| file.directory && &file.path != suite)
            .filter(|file| {
                let dir = file.path.as_str().trim_end_matches('/');
                suite.as_str().starts_with(&format!("{dir}/"))
            })
            .collect();
        inits.sort_by_key(|file| std::cmp::Reverse(file.path.as_str().len()));
        inits
    }

    fn inherited_test_setting(
        &self,
        suite: &SourceFile,
        pick: impl Fn(&SourceFile) -> Option<&Executable>,
    ) -> Option<Executable> {
        pick(suite)
            .or_else(|| {
                self.init_files_above(&suite.path)
                    .into_iter()
                    .find_map(|file| pick(file))
            })
            .cloned()
    }

    fn keyword_candidates<'a>(
        &'a self,
        suite: &'a SourceFile,
        loaded_resources: &[Url],
    ) -> Vec<&'a SourceFile> {
        let mut candidates = vec![suite];
        let imported = suite.resources.iter().chain(loaded_resources);
        for path in imported {
            let local = self.translate_path(path, false);
            if let Some(file) = local.as_ref().and_then(|local| self.file(local)) {
                if !candidates.iter().any(|c| c.path == file.path) {
                    candidates.push(file);
                }
            }
        }
        candidates
    }
}

fn score_candidate(remote: &Url, candidate: &Url) -> usize {
    let remote: Vec<&str> = remote.path().split('/').collect();
    let candidate: Vec<&str> = candidate.path().split('/').collect();
    remote
        .iter()
        .rev()
        .zip(candidate.iter().rev())
        .take_while(|(a, b)| a.eq_ignore_ascii_case(b))
        .count()
}

fn last_segment(path: &Url) -> Option<&str> {
    path.path_segments()?.filter(|s| !s.is_empty()).last()
}

fn qualified(source_name: &str, name: &str) -> String {
    if source_name.is_empty() {
        name.to_string()
    } else {
        format!("{source_name}.{name}")
    }
}

impl ElementsLocator for ModelLocator {
    fn find_context_for_suite(
        &self,
        name: &str,
        path: Option<&Url>,
        is_directory: bool,
        _current_suite: Option<&Url>,
    ) -> StackFrameContext {
        let Some(path) = path else {
            // merged top-level suite of several data sources
            return StackFrameContext::Suite(SuiteContext::new(
                name,
                is_directory,
                ExecutableBody::default(),
            ));
        };

        let Some(file) = self
            .translate_path(path, is_directory)
            .and_then(|local| self.file(&local))
        else {
            let kind = if is_directory { "directory" } else { "file" };
            return StackFrameContext::Suite(
                SuiteContext::new(
                    name,
                    is_directory,
                    ExecutableBody::new(Some(path.clone()), -1),
                )
                .with_error(format!(
                    "The suite '{name}' is executed from {kind} '{path}' which cannot be found locally\n"
                )),
            );
        };

        let body = ExecutableBody::new(Some(file.path.clone()), 1)
            .with_setup(file.setup.clone())
            .with_teardown(file.teardown.clone());
        StackFrameContext::Suite(SuiteContext::new(name, is_directory, body))
    }

    fn find_context_for_test_case(
        &self,
        name: &str,
        current_suite: Option<&Url>,
        template: Option<&str>,
    ) -> StackFrameContext {
        let Some(suite) = current_suite.and_then(|path| self.file(path)) else {
            return StackFrameContext::Test(
                TestCaseContext::new(name, ExecutableBody::default()).with_error(format!(
                    "Unable to find test '{name}': its suite file is unknown\n"
                )),
            );
        };

        let matching: Vec<&TestModel> = suite
            .tests
            .iter()
            .filter(|test| test.name.eq_ignore_ascii_case(name))
            .collect();
        let Some(test) = matching.first() else {
            return StackFrameContext::Test(
                TestCaseContext::new(name, ExecutableBody::new(Some(suite.path.clone()), 1))
                    .with_error(format!(
                        "Unable to find test '{name}' in suite '{}'\n",
                        suite.path
                    )),
            );
        };

        let body = ExecutableBody::new(Some(suite.path.clone()), test.line)
            .with_calls(test.body.clone())
            .with_setup(
                test.setup
                    .clone()
                    .or_else(|| self.inherited_test_setting(suite, |f| f.test_setup.as_ref())),
            )
            .with_teardown(
                test.teardown
                    .clone()
                    .or_else(|| self.inherited_test_setting(suite, |f| f.test_teardown.as_ref())),
            );
        let context = TestCaseContext::new(name, body);

        let context = if matching.len() > 1 {
            context.with_error(format!(
                "Unable to find unique test '{name}': there are {} tests with this name\n",
                matching.len()
            ))
        } else if test.template.as_deref() != template {
            let describe = |t: Option<&str>| t.map_or("no".to_string(), |t| format!("'{t}'"));
            context.with_error(format!(
                "Test '{name}' is executed with {} template but {} template is defined locally\n",
                describe(template),
                describe(test.template.as_deref())
            ))
        } else {
            context
        };
        StackFrameContext::Test(context)
    }

    fn find_context_for_keyword(
        &self,
        source_name: &str,
        name: &str,
        current_suite: Option<&Url>,
        loaded_resources: &[Url],
    ) -> StackFrameContext {
        let call = qualified(source_name, name);
        if self.is_library(source_name) {
            return StackFrameContext::Keyword(KeywordContext::library_keyword(call));
        }
        let Some(suite) = current_suite.and_then(|path| self.file(path)) else {
            return StackFrameContext::Keyword(
                KeywordContext::user_keyword(call.clone(), ExecutableBody::default())
                    .with_error(format!("Unable to find keyword '{call}'\n")),
            );
        };

        let wanted = normalize_keyword_name(name);
        let matching: Vec<(&SourceFile, &KeywordModel)> = self
            .keyword_candidates(suite, loaded_resources)
            .into_iter()
            .flat_map(|file| file.keywords.iter().map(move |kw| (file, kw)))
            .filter(|(_, kw)| normalize_keyword_name(&kw.name) == wanted)
            .collect();

        let preferred: Vec<_> = if source_name.is_empty() || matching.len() <= 1 {
            matching
        } else {
            let from_source: Vec<_> = matching
                .iter()
                .copied()
                .filter(|(file, _)| {
                    file.stem()
                        .is_some_and(|stem| stem.eq_ignore_ascii_case(source_name))
                })
                .collect();
            if from_source.is_empty() {
                matching
            } else {
                from_source
            }
        };

        match preferred.as_slice() {
            [(file, keyword)] => {
                let body = ExecutableBody::new(Some(file.path.clone()), keyword.line)
                    .with_calls(keyword.body.clone())
                    .with_teardown(keyword.teardown.clone());
                StackFrameContext::Keyword(KeywordContext::user_keyword(call, body))
            }
            [] if !source_name.is_empty() && !self.is_known_source(source_name) => {
                StackFrameContext::Keyword(KeywordContext::library_keyword(call))
            }
            [] => StackFrameContext::Keyword(
                KeywordContext::user_keyword(call.clone(), ExecutableBody::default()).with_error(
                    format!(
                        "Unable to find keyword '{call}' accessible from suite '{}'\n",
                        suite.path
                    ),
                ),
            ),
            _ => StackFrameContext::Keyword(
                KeywordContext::user_keyword(call.clone(), ExecutableBody::default()).with_error(
                    format!("Unable to find unique keyword '{call}': there are several matching definitions\n"),
                ),
            ),
        }
    }

    fn translate_path(&self, path: &Url, is_directory: bool) -> Option<Url> {
        if self.file(path).is_some() {
            return Some(path.clone());
        }
        let name = last_segment(path)?;
        let best = self
            .model
            .files
            .iter()
            .filter(|file| file.directory == is_directory)
            .filter(|file| last_segment(&file.path).is_some_and(|s| s.eq_ignore_ascii_case(name)))
            .max_by_key(|file| score_candidate(path, &file.path));
        match best {
            Some(file) => Some(file.path.clone()),
            None => {
                warn!(%path, "no local source for remote path");
                None
            }
        }
    }
}
