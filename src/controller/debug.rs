use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    Callback, PendingResponse, ProcessController, ResponseWithCallback, UserProcessController,
};
use crate::agent::ServerResponse;
use crate::debugger::{
    FrameCategory, FrameId, LineBreakpoint, PausingPoint, StackFrame, StackFrameMarker,
    StackFrameVariable, Stacktrace, SteppingMode,
};
use crate::error::{DebuggerError, Result};

/// User settings consulted while deciding whether to pause.
#[derive(Debug, Clone)]
pub struct DebuggerPreferences {
    pause_on_error: Arc<AtomicBool>,
    go_into_lib_keywords: bool,
}

impl DebuggerPreferences {
    pub fn new(pause_on_error: Arc<AtomicBool>, go_into_lib_keywords: bool) -> Self {
        Self {
            pause_on_error,
            go_into_lib_keywords,
        }
    }

    pub fn fixed(pause_on_error: bool, go_into_lib_keywords: bool) -> Self {
        Self::new(Arc::new(AtomicBool::new(pause_on_error)), go_into_lib_keywords)
    }

    pub fn should_pause_on_error(&self) -> bool {
        self.pause_on_error.load(Ordering::SeqCst)
    }

    pub fn should_go_into_lib_keywords(&self) -> bool {
        self.go_into_lib_keywords
    }

    /// Switch for pausing on errors which can be flipped while the session runs.
    pub fn pause_on_error_flag(&self) -> Arc<AtomicBool> {
        self.pause_on_error.clone()
    }
}

/// Notified about the reason each time the execution actually pauses.
pub trait PauseReasonListener: Send + Sync {
    fn paused_on_breakpoint(&self, _breakpoint: &LineBreakpoint) {}

    fn paused_by_user(&self) {}

    fn paused_by_stepping(&self) {}

    fn paused_on_error(&self, _error: &str) {}

    fn paused_after_variable_change(&self, _frame_level: usize) {}
}

enum Suspension {
    UserRequest,
    Breakpoint(Arc<LineBreakpoint>),
    Stepping {
        mode: SteppingMode,
        when_stepping_ends: Option<Callback>,
    },
    VariableChange(usize),
    ErroneousState(String),
}

/// Observable shape of the current suspension reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspensionKind {
    UserRequest,
    Breakpoint,
    Stepping(SteppingMode),
    VariableChange(usize),
    ErroneousState(String),
}

impl Suspension {
    fn kind(&self) -> SuspensionKind {
        match self {
            Self::UserRequest => SuspensionKind::UserRequest,
            Self::Breakpoint(_) => SuspensionKind::Breakpoint,
            Self::Stepping { mode, .. } => SuspensionKind::Stepping(*mode),
            Self::VariableChange(level) => SuspensionKind::VariableChange(*level),
            Self::ErroneousState(error) => SuspensionKind::ErroneousState(error.clone()),
        }
    }
}

#[derive(Default)]
struct DebugState {
    last_pausing_point: Option<PausingPoint>,
    suspension: Option<Suspension>,
}

/// Robot condition arguments are separated by two or more spaces or a tab.
fn split_condition(condition: &str) -> Vec<String> {
    static SEPARATOR: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(separator) = SEPARATOR
        .get_or_init(|| Regex::new(r"(\s{2,}|\t)").ok())
        .as_ref()
    else {
        return vec![condition.to_string()];
    };
    let mut arguments: Vec<String> = separator.split(condition).map(str::to_string).collect();
    while arguments.last().is_some_and(String::is_empty) {
        arguments.pop();
    }
    arguments
}

fn any_marked_stepping(stack: &Stacktrace) -> bool {
    stack.iter().any(StackFrame::is_marked_stepping)
}

fn top_is_library_keyword(stack: &Stacktrace) -> bool {
    stack
        .peek_current_frame()
        .is_some_and(StackFrame::is_library_keyword_frame)
}

pub struct UserProcessDebugController {
    base: UserProcessController,
    stack: Arc<Mutex<Stacktrace>>,
    preferences: DebuggerPreferences,
    state: Mutex<DebugState>,
    listeners: RwLock<Vec<Arc<dyn PauseReasonListener>>>,
}

impl UserProcessDebugController {
    pub fn new(stack: Arc<Mutex<Stacktrace>>, preferences: DebuggerPreferences) -> Self {
        Self {
            base: UserProcessController::new(),
            stack,
            preferences,
            state: Mutex::new(DebugState::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn preferences(&self) -> &DebuggerPreferences {
        &self.preferences
    }

    pub fn when_suspended(&self, listener: Arc<dyn PauseReasonListener>) {
        self.listeners.write().push(listener);
    }

    pub fn pending_responses(&self) -> usize {
        self.base.pending_responses()
    }

    pub fn last_pausing_point(&self) -> Option<PausingPoint> {
        self.state.lock().last_pausing_point
    }

    pub fn suspension(&self) -> Option<SuspensionKind> {
        self.state.lock().suspension.as_ref().map(Suspension::kind)
    }

    pub fn is_stepping(&self) -> bool {
        matches!(
            self.state.lock().suspension,
            Some(Suspension::Stepping { .. })
        )
    }

    pub fn pause(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.state.lock();
        self.base.pause(when_sent)?;
        state.suspension = Some(Suspension::UserRequest);
        Ok(())
    }

    pub fn resume(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.base.resume(when_sent)
    }

    pub fn terminate(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.base.terminate(when_sent)
    }

    pub fn disconnect(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.base.disconnect(when_sent)
    }

    pub fn interrupt(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.base.interrupt(when_sent)
    }

    /// Only the top frame can be stepped into.
    pub fn step_into(
        &self,
        when_sent: impl FnOnce() + Send + 'static,
        when_stepping_ends: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut stack = self.stack.lock();
        let mut state = self.state.lock();
        self.start_stepping(
            &mut stack,
            &mut state,
            SteppingMode::Into,
            None,
            when_sent,
            when_stepping_ends,
        )
    }

    pub fn step_over(
        &self,
        frame: FrameId,
        when_sent: impl FnOnce() + Send + 'static,
        when_stepping_ends: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut stack = self.stack.lock();
        let mut state = self.state.lock();
        stack.frame(frame).ok_or(DebuggerError::UnknownFrame(frame))?;

        // at START_KEYWORD the frame of the called keyword is already pushed
        let marked = if state.last_pausing_point == Some(PausingPoint::StartKeyword) {
            stack.find_parent_frame(frame).map(StackFrame::id)
        } else {
            Some(frame)
        };
        self.start_stepping(
            &mut stack,
            &mut state,
            SteppingMode::Over,
            marked,
            when_sent,
            when_stepping_ends,
        )
    }

    pub fn step_return(
        &self,
        frame: FrameId,
        when_sent: impl FnOnce() + Send + 'static,
        when_stepping_ends: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut stack = self.stack.lock();
        let mut state = self.state.lock();
        stack.frame(frame).ok_or(DebuggerError::UnknownFrame(frame))?;
        self.start_stepping(
            &mut stack,
            &mut state,
            SteppingMode::Return,
            Some(frame),
            when_sent,
            when_stepping_ends,
        )
    }

    // Frames are marked and the mode recorded only once the resume was queued.
    fn start_stepping(
        &self,
        stack: &mut Stacktrace,
        state: &mut DebugState,
        mode: SteppingMode,
        marked: Option<FrameId>,
        when_sent: impl FnOnce() + Send + 'static,
        when_stepping_ends: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.base.resume(when_sent)?;
        if let Some(frame) = marked.and_then(|id| stack.frame_mut(id)) {
            frame.mark(StackFrameMarker::Stepping);
        }
        state.suspension = Some(Suspension::Stepping {
            mode,
            when_stepping_ends: Some(Box::new(when_stepping_ends)),
        });
        debug!(?mode, "stepping requested");
        Ok(())
    }

    pub fn change_variable(
        &self,
        frame: FrameId,
        variable: &StackFrameVariable,
        arguments: Vec<String>,
    ) -> Result<()> {
        self.change_variable_inner_value(frame, variable, Vec::new(), arguments)
    }

    /// Changes a value nested inside a list or dictionary variable; `path` leads to it.
    pub fn change_variable_inner_value(
        &self,
        frame: FrameId,
        variable: &StackFrameVariable,
        path: Vec<Value>,
        arguments: Vec<String>,
    ) -> Result<()> {
        let level = self
            .stack
            .lock()
            .frame(frame)
            .map(StackFrame::level)
            .ok_or(DebuggerError::UnknownFrame(frame))?;
        let response = ServerResponse::ChangeVariable {
            name: variable.name().to_string(),
            scope: variable.scope(),
            level,
            path,
            arguments,
        };
        let mut state = self.state.lock();
        self.base.offer(ResponseWithCallback::new(response, || {}))?;
        state.suspension = Some(Suspension::VariableChange(level));
        Ok(())
    }

    fn pause_on_error_response(
        &self,
        stack: &mut Stacktrace,
        state: &mut DebugState,
        pausing_point: PausingPoint,
    ) -> Option<ServerResponse> {
        if !matches!(
            pausing_point,
            PausingPoint::PreStartKeyword | PausingPoint::StartKeyword
        ) {
            return None;
        }
        let erroneous = stack.iter().any(|frame| frame.context().is_erroneous());
        if !erroneous
            || stack.iter().any(StackFrame::is_marked_error)
            || !self.preferences.should_pause_on_error()
        {
            return None;
        }

        // marked frames will not suspend again until they are popped
        for frame in stack
            .iter_mut()
            .filter(|frame| frame.context().is_erroneous())
        {
            frame.mark(StackFrameMarker::Error);
        }
        let error = stack
            .iter()
            .find(|frame| frame.context().is_erroneous())
            .and_then(StackFrame::error_message)
            .unwrap_or_default();
        info!(%error, "pausing on erroneous state");
        state.suspension = Some(Suspension::ErroneousState(error));
        Some(ServerResponse::Pause)
    }

    fn breakpoint_hit_response(
        &self,
        stack: &Stacktrace,
        state: &mut DebugState,
        pausing_point: PausingPoint,
    ) -> Option<ServerResponse> {
        if pausing_point != PausingPoint::PreStartKeyword {
            return None;
        }
        let breakpoint = stack.peek_current_frame()?.breakpoint()?;
        if !breakpoint.evaluate_hit_count() {
            return None;
        }

        debug!(path = %breakpoint.path(), line = breakpoint.line(), "breakpoint hit");
        let response = match breakpoint.condition() {
            Some(condition) if breakpoint.is_condition_enabled() => {
                ServerResponse::EvaluateCondition(split_condition(condition))
            }
            _ => ServerResponse::Pause,
        };
        state.suspension = Some(Suspension::Breakpoint(breakpoint));
        Some(response)
    }

    fn should_pause_on_step_into(&self, stack: &Stacktrace, pausing_point: PausingPoint) -> bool {
        // loops are stepped through their iterations
        if stack.has_category_on_top(FrameCategory::For) {
            return false;
        }
        if self.preferences.should_go_into_lib_keywords() {
            pausing_point != PausingPoint::EndKeyword
        } else {
            matches!(
                pausing_point,
                PausingPoint::PreStartKeyword | PausingPoint::StartKeyword
            ) && !top_is_library_keyword(stack)
        }
    }

    fn should_pause_on_step_over(&self, stack: &Stacktrace, pausing_point: PausingPoint) -> bool {
        match pausing_point {
            PausingPoint::StartKeyword => {
                stack.has_category_on_top(FrameCategory::ForItem)
                    && (stack
                        .iter()
                        .nth(1)
                        .is_some_and(StackFrame::is_marked_stepping)
                        || !any_marked_stepping(stack))
            }
            PausingPoint::PreStartKeyword => {
                !stack.has_category_on_top(FrameCategory::For)
                    && (stack
                        .peek_current_frame()
                        .is_some_and(StackFrame::is_marked_stepping)
                        || !any_marked_stepping(stack))
            }
            _ => false,
        }
    }

    fn should_pause_on_step_return(&self, stack: &Stacktrace, pausing_point: PausingPoint) -> bool {
        matches!(
            pausing_point,
            PausingPoint::PreStartKeyword | PausingPoint::PreEndKeyword
        ) && (self.preferences.should_go_into_lib_keywords() || !top_is_library_keyword(stack))
            && !any_marked_stepping(stack)
    }

    fn stepping_response(
        &self,
        stack: &Stacktrace,
        state: &mut DebugState,
        pausing_point: PausingPoint,
    ) -> Option<Callback> {
        let Some(Suspension::Stepping {
            mode,
            when_stepping_ends,
        }) = state.suspension.as_mut()
        else {
            return None;
        };
        let pause = match mode {
            SteppingMode::Into => self.should_pause_on_step_into(stack, pausing_point),
            SteppingMode::Over => self.should_pause_on_step_over(stack, pausing_point),
            SteppingMode::Return => self.should_pause_on_step_return(stack, pausing_point),
        };
        if !pause {
            return None;
        }
        debug!(?mode, ?pausing_point, "stepping ended");
        Some(when_stepping_ends.take().unwrap_or_else(|| Box::new(|| {})))
    }

    fn notify_listeners(&self, suspension: &Suspension) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            match suspension {
                Suspension::Breakpoint(breakpoint) => listener.paused_on_breakpoint(breakpoint),
                Suspension::UserRequest => listener.paused_by_user(),
                Suspension::Stepping { .. } => listener.paused_by_stepping(),
                Suspension::VariableChange(level) => listener.paused_after_variable_change(*level),
                Suspension::ErroneousState(error) => listener.paused_on_error(error),
            }
        }
    }
}

impl ProcessController for UserProcessDebugController {
    fn take_current_response(&self, pausing_point: PausingPoint) -> Option<ServerResponse> {
        let manual = {
            let mut state = self.state.lock();
            state.last_pausing_point = Some(pausing_point);
            self.base.take_queued()
        };
        if let Some(manual) = manual {
            return Some(manual.deliver());
        }

        let mut stack = self.stack.lock();
        let mut state = self.state.lock();
        if let Some(response) = self.pause_on_error_response(&mut stack, &mut state, pausing_point) {
            return Some(response);
        }
        if let Some(response) = self.breakpoint_hit_response(&stack, &mut state, pausing_point) {
            return Some(response);
        }
        let when_stepping_ends = self.stepping_response(&stack, &mut state, pausing_point)?;
        drop(state);
        drop(stack);
        when_stepping_ends();
        Some(ServerResponse::Pause)
    }

    fn take_future_response(&self) -> PendingResponse {
        self.base.take_future_response()
    }

    fn execution_paused(&self) {
        let suspension = {
            let mut stack = self.stack.lock();
            let suspension = self.state.lock().suspension.take();
            for frame in stack.iter_mut() {
                frame.unmark(StackFrameMarker::Stepping);
            }
            suspension
        };
        match suspension {
            Some(suspension) => {
                info!(reason = ?suspension.kind(), "execution paused");
                self.notify_listeners(&suspension);
            }
            None => debug!("execution paused without a recorded reason"),
        }
    }

    fn condition_evaluated(&self, outcome: std::result::Result<bool, String>) {
        // true or an evaluation error keeps the breakpoint suspension
        if outcome == Ok(false) {
            self.state.lock().suspension = None;
        }
        debug!(?outcome, "breakpoint condition evaluated");
    }

    fn close(&self) {
        self.base.close();
    }
}
