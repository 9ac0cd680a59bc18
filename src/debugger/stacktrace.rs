use url::Url;

use super::frame::{FrameCategory, FrameId, StackFrame};
use super::variables::{ScopedVariables, StackFrameVariables};

/// Call stack of the running process. The last pushed frame is the top one.
#[derive(Debug, Default)]
pub struct Stacktrace {
    frames: Vec<StackFrame>,
    global_variables: Option<StackFrameVariables>,
}

impl Stacktrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    pub fn peek_current_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn peek_current_frame_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut()
    }

    pub fn size(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn destroy(&mut self) {
        self.frames.clear();
        self.global_variables = None;
    }

    /// Frames from the top of the stack down to the bottom one.
    pub fn iter(&self) -> impl Iterator<Item = &StackFrame> {
        self.frames.iter().rev()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StackFrame> {
        self.frames.iter_mut().rev()
    }

    pub fn frame(&self, id: FrameId) -> Option<&StackFrame> {
        self.frames.iter().find(|frame| frame.id() == id)
    }

    pub fn frame_mut(&mut self, id: FrameId) -> Option<&mut StackFrame> {
        self.frames.iter_mut().find(|frame| frame.id() == id)
    }

    /// Frame right below the given one. When the frame is not on the stack the bottom-up
    /// walk never stops and the top frame is returned.
    pub fn find_parent_frame(&self, id: FrameId) -> Option<&StackFrame> {
        let mut previous = None;
        for frame in &self.frames {
            if frame.id() == id {
                return previous;
            }
            previous = Some(frame);
        }
        previous
    }

    pub fn has_category_on_top(&self, category: FrameCategory) -> bool {
        self.peek_current_frame()
            .is_some_and(|frame| frame.has_category(category))
    }

    /// Path of the source which is currently executed.
    pub fn current_path(&self) -> Option<&Url> {
        self.peek_current_frame()
            .and_then(StackFrame::current_source_path)
    }

    /// Closest path known to the frames on the stack, searching from the top.
    pub fn context_path(&self) -> Option<&Url> {
        self.iter().find_map(StackFrame::context_path)
    }

    /// Resources loaded by all suites currently on the stack.
    pub fn loaded_resources(&self) -> Vec<Url> {
        self.frames
            .iter()
            .filter(|frame| frame.is_suite_context())
            .flat_map(StackFrame::loaded_resources)
            .cloned()
            .collect()
    }

    pub fn global_variables(&self) -> Option<&StackFrameVariables> {
        self.global_variables.as_ref()
    }

    pub fn set_global_variables(&mut self, variables: StackFrameVariables) {
        self.global_variables = Some(variables);
    }

    /// Applies per-level snapshots given innermost first, as the agent sends them. After
    /// reversal the slot at index 0 holds globals and frame `n` reads slot `level + 1`.
    pub fn update_variables(&mut self, snapshots: &[ScopedVariables]) {
        let ordered: Vec<&ScopedVariables> = snapshots.iter().rev().collect();

        if let Some(globals) = ordered.first() {
            match self.global_variables.as_mut() {
                Some(variables) => {
                    variables.update(globals);
                }
                None => {
                    self.global_variables =
                        Some(StackFrameVariables::new_non_local_variables(globals));
                }
            }
        }

        for frame in self
            .frames
            .iter_mut()
            .filter(|frame| !frame.is_library_keyword_frame())
        {
            if let Some(snapshot) = ordered.get(frame.level() + 1) {
                frame.update_variables(snapshot);
            }
        }
    }
}

impl<'a> IntoIterator for &'a Stacktrace {
    type Item = &'a StackFrame;
    type IntoIter = std::iter::Rev<std::slice::Iter<'a, StackFrame>>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter().rev()
    }
}
