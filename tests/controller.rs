use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use robot_debugger::agent::ServerResponse;
use robot_debugger::controller::{
    DebuggerPreferences, PauseReasonListener, ProcessController, SuspensionKind,
    UserProcessController, UserProcessDebugController,
};
use robot_debugger::debugger::{
    Breakpoints, DefaultContext, Executable, ExecutableBody, FrameCategory, FrameId,
    KeywordCallType, KeywordContext, LineBreakpoint, PausingPoint, RunningKeyword, StackFrame,
    StackFrameContext, StackFrameVariable, Stacktrace, SteppingMode, TestCaseContext,
    VariableScope,
};
use robot_debugger::DebuggerError;
use serde_json::json;
use url::Url;

const SUITE: &str = "file:///project/suite.robot";

fn plain_frame(name: &str, category: FrameCategory, level: usize) -> StackFrame {
    StackFrame::new(
        name,
        category,
        level,
        StackFrameContext::Default(DefaultContext::new(None, None)),
    )
}

fn library_frame(name: &str, level: usize) -> StackFrame {
    StackFrame::new(
        name,
        FrameCategory::Keyword,
        level,
        StackFrameContext::Keyword(KeywordContext::library_keyword(name)),
    )
}

// Test frame already moved to its first call, which sits on line 5
fn test_frame_at_breakpoint(breakpoints: &Breakpoints) -> StackFrame {
    let body = ExecutableBody::new(Some(Url::parse(SUITE).unwrap()), 4)
        .with_calls(vec![Executable::call("Log", 5)]);
    let mut frame = StackFrame::new(
        "Test",
        FrameCategory::Test,
        1,
        StackFrameContext::Test(TestCaseContext::new("Test", body)),
    );
    frame.move_to_keyword(
        &RunningKeyword::new("BuiltIn", "Log", KeywordCallType::NormalCall),
        breakpoints,
    );
    frame
}

struct Session {
    stack: Arc<Mutex<Stacktrace>>,
    controller: UserProcessDebugController,
}

impl Session {
    fn new(pause_on_error: bool, go_into_lib_keywords: bool) -> Self {
        let stack = Arc::new(Mutex::new(Stacktrace::new()));
        let controller = UserProcessDebugController::new(
            stack.clone(),
            DebuggerPreferences::fixed(pause_on_error, go_into_lib_keywords),
        );
        Self { stack, controller }
    }

    fn push(&self, frame: StackFrame) -> FrameId {
        let id = frame.id();
        self.stack.lock().push(frame);
        id
    }

    fn pop(&self) {
        self.stack.lock().pop();
    }

    fn respond(&self, point: PausingPoint) -> Option<ServerResponse> {
        self.controller.take_current_response(point)
    }
}

#[derive(Default)]
struct RecordingListener {
    user: AtomicUsize,
    stepping: AtomicUsize,
    breakpoints: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl PauseReasonListener for RecordingListener {
    fn paused_on_breakpoint(&self, _breakpoint: &LineBreakpoint) {
        self.breakpoints.fetch_add(1, Ordering::SeqCst);
    }

    fn paused_by_user(&self) {
        self.user.fetch_add(1, Ordering::SeqCst);
    }

    fn paused_by_stepping(&self) {
        self.stepping.fetch_add(1, Ordering::SeqCst);
    }

    fn paused_on_error(&self, error: &str) {
        self.errors.lock().push(error.to_string());
    }
}

#[cfg(test)]
mod controller_tests {
    use super::*;

    #[test]
    fn test_nothing_to_do_means_no_response() {
        let session = Session::new(false, false);
        session.push(plain_frame("Suite", FrameCategory::Suite, 0));

        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None);
        assert_eq!(
            session.controller.last_pausing_point(),
            Some(PausingPoint::PreStartKeyword)
        );
    }

    #[test]
    fn test_only_one_manual_response_is_queued() {
        let controller = UserProcessController::new();
        controller.pause(|| {}).unwrap();
        assert_eq!(controller.pending_responses(), 1);

        let second = controller.resume(|| {});
        assert!(matches!(second, Err(DebuggerError::ResponseQueueFull)));

        assert_eq!(
            controller.take_current_response(PausingPoint::PreStartKeyword),
            Some(ServerResponse::Pause)
        );
        assert_eq!(controller.pending_responses(), 0);
        controller.resume(|| {}).unwrap();
    }

    #[test]
    fn test_callback_runs_when_response_is_taken() {
        let controller = UserProcessController::new();
        let sent = Arc::new(AtomicBool::new(false));
        let flag = sent.clone();
        controller
            .terminate(move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        assert!(!sent.load(Ordering::SeqCst));

        assert_eq!(
            controller.take_current_response(PausingPoint::EndKeyword),
            Some(ServerResponse::Terminate)
        );
        assert!(sent.load(Ordering::SeqCst));
    }

    #[test]
    fn test_future_response_waits_for_user() {
        let controller = UserProcessController::new();
        let pending = controller.take_future_response();
        let waiter = thread::spawn(move || pending.wait());

        thread::sleep(Duration::from_millis(20));
        controller.resume(|| {}).unwrap();
        assert_eq!(waiter.join().unwrap(), Some(ServerResponse::Resume));
    }

    #[test]
    fn test_closing_releases_waiters() {
        let controller = UserProcessController::new();
        let pending = controller.take_future_response();
        let waiter = thread::spawn(move || pending.wait());

        controller.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert_eq!(
            controller
                .take_future_response()
                .wait_timeout(Duration::from_millis(10)),
            None
        );
    }

    #[test]
    fn test_user_pause_is_reported_to_listeners() {
        let session = Session::new(false, false);
        let listener = Arc::new(RecordingListener::default());
        session.controller.when_suspended(listener.clone());
        session.push(plain_frame("Suite", FrameCategory::Suite, 0));

        session.controller.pause(|| {}).unwrap();
        assert_eq!(session.controller.suspension(), Some(SuspensionKind::UserRequest));
        assert_eq!(session.respond(PausingPoint::StartKeyword), Some(ServerResponse::Pause));

        session.controller.execution_paused();
        assert_eq!(listener.user.load(Ordering::SeqCst), 1);
        assert_eq!(session.controller.suspension(), None);
    }

    #[test]
    fn test_rejected_step_keeps_user_pause() {
        let session = Session::new(false, false);
        let listener = Arc::new(RecordingListener::default());
        session.controller.when_suspended(listener.clone());
        session.push(plain_frame("Test", FrameCategory::Test, 0));
        let keyword = session.push(plain_frame("My Keyword", FrameCategory::Keyword, 1));

        session.controller.pause(|| {}).unwrap();
        let stepped = session.controller.step_into(|| {}, || {});
        assert!(matches!(stepped, Err(DebuggerError::ResponseQueueFull)));
        let returned = session.controller.step_return(keyword, || {}, || {});
        assert!(matches!(returned, Err(DebuggerError::ResponseQueueFull)));

        assert_eq!(session.controller.suspension(), Some(SuspensionKind::UserRequest));
        assert!(!session.stack.lock().iter().any(StackFrame::is_marked_stepping));

        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
        session.controller.execution_paused();
        assert_eq!(listener.user.load(Ordering::SeqCst), 1);
        assert_eq!(listener.stepping.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejected_variable_change_keeps_suspension() {
        let session = Session::new(false, false);
        let test = session.push(plain_frame("Test", FrameCategory::Test, 1));
        let variable = StackFrameVariable::new(VariableScope::TestCase, false, "${x}", "int", json!(1));

        session.controller.pause(|| {}).unwrap();
        let result = session.controller.change_variable(test, &variable, vec!["2".into()]);

        assert!(matches!(result, Err(DebuggerError::ResponseQueueFull)));
        assert_eq!(session.controller.suspension(), Some(SuspensionKind::UserRequest));
    }

    #[test]
    fn test_breakpoint_pauses_before_keyword_starts() {
        let breakpoints = Breakpoints::new();
        breakpoints.add(LineBreakpoint::new(Url::parse(SUITE).unwrap(), 5));
        let session = Session::new(false, false);
        let listener = Arc::new(RecordingListener::default());
        session.controller.when_suspended(listener.clone());
        session.push(test_frame_at_breakpoint(&breakpoints));

        assert_eq!(session.respond(PausingPoint::StartKeyword), None);
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
        assert_eq!(session.controller.suspension(), Some(SuspensionKind::Breakpoint));

        session.controller.execution_paused();
        assert_eq!(listener.breakpoints.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hit_count_skips_early_hits() {
        let breakpoints = Breakpoints::new();
        breakpoints.add(LineBreakpoint::new(Url::parse(SUITE).unwrap(), 5).with_hit_count(2));
        let session = Session::new(false, false);
        session.push(test_frame_at_breakpoint(&breakpoints));

        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None);
        assert_eq!(session.controller.suspension(), None);
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
    }

    #[test]
    fn test_early_hit_falls_through_to_stepping() {
        let breakpoints = Breakpoints::new();
        breakpoints.add(LineBreakpoint::new(Url::parse(SUITE).unwrap(), 5).with_hit_count(2));
        let session = Session::new(false, false);
        session.push(test_frame_at_breakpoint(&breakpoints));

        session.controller.step_into(|| {}, || {}).unwrap();
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Resume));

        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
        assert_eq!(
            session.controller.suspension(),
            Some(SuspensionKind::Stepping(SteppingMode::Into))
        );
    }

    #[test]
    fn test_conditional_breakpoint_asks_agent_to_evaluate() {
        let breakpoints = Breakpoints::new();
        breakpoints.add(
            LineBreakpoint::new(Url::parse(SUITE).unwrap(), 5)
                .with_condition("Should Be Equal  ${x}\t5", true),
        );
        let session = Session::new(false, false);
        session.push(test_frame_at_breakpoint(&breakpoints));

        assert_eq!(
            session.respond(PausingPoint::PreStartKeyword),
            Some(ServerResponse::EvaluateCondition(vec![
                "Should Be Equal".into(),
                "${x}".into(),
                "5".into()
            ]))
        );

        session.controller.condition_evaluated(Ok(true));
        assert_eq!(session.controller.suspension(), Some(SuspensionKind::Breakpoint));
        session.controller.condition_evaluated(Err("No keyword".into()));
        assert_eq!(session.controller.suspension(), Some(SuspensionKind::Breakpoint));
        session.controller.condition_evaluated(Ok(false));
        assert_eq!(session.controller.suspension(), None);
    }

    #[test]
    fn test_disabled_condition_pauses_unconditionally() {
        let breakpoints = Breakpoints::new();
        breakpoints.add(
            LineBreakpoint::new(Url::parse(SUITE).unwrap(), 5).with_condition("${x} == 5", false),
        );
        let session = Session::new(false, false);
        session.push(test_frame_at_breakpoint(&breakpoints));

        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
    }

    #[test]
    fn test_erroneous_state_pauses_once() {
        let session = Session::new(true, false);
        let listener = Arc::new(RecordingListener::default());
        session.controller.when_suspended(listener.clone());
        session.push(plain_frame("Suite", FrameCategory::Suite, 0));
        session.push(StackFrame::new(
            "Test",
            FrameCategory::Test,
            1,
            StackFrameContext::Test(
                TestCaseContext::new("Test", ExecutableBody::default())
                    .with_error("Unable to find test 'Test'\n"),
            ),
        ));

        assert_eq!(session.respond(PausingPoint::PreEndKeyword), None);
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
        assert_eq!(
            session.controller.suspension(),
            Some(SuspensionKind::ErroneousState("Unable to find test 'Test'\n".into()))
        );
        assert!(session.stack.lock().peek_current_frame().unwrap().is_marked_error());

        session.controller.execution_paused();
        assert_eq!(*listener.errors.lock(), vec!["Unable to find test 'Test'\n".to_string()]);
        assert_eq!(session.respond(PausingPoint::StartKeyword), None, "Marked frames pause once");
    }

    #[test]
    fn test_errors_are_ignored_when_preference_is_off() {
        let session = Session::new(false, false);
        session.push(StackFrame::new(
            "Test",
            FrameCategory::Test,
            0,
            StackFrameContext::Test(
                TestCaseContext::new("Test", ExecutableBody::default()).with_error("broken\n"),
            ),
        ));
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None);
    }

    #[test]
    fn test_pause_on_error_can_be_switched_while_running() {
        let flag = Arc::new(AtomicBool::new(false));
        let stack = Arc::new(Mutex::new(Stacktrace::new()));
        let controller =
            UserProcessDebugController::new(stack.clone(), DebuggerPreferences::new(flag.clone(), false));
        stack.lock().push(StackFrame::new(
            "Test",
            FrameCategory::Test,
            0,
            StackFrameContext::Test(
                TestCaseContext::new("Test", ExecutableBody::default()).with_error("broken\n"),
            ),
        ));

        assert_eq!(controller.take_current_response(PausingPoint::PreStartKeyword), None);
        flag.store(true, Ordering::SeqCst);
        assert_eq!(
            controller.take_current_response(PausingPoint::PreStartKeyword),
            Some(ServerResponse::Pause)
        );
    }

    #[test]
    fn test_step_into_skips_loop_headers() {
        let session = Session::new(false, false);
        let ended = Arc::new(AtomicBool::new(false));
        let flag = ended.clone();
        session.push(plain_frame("Suite", FrameCategory::Suite, 0));
        session.push(plain_frame("Test", FrameCategory::Test, 1));

        session
            .controller
            .step_into(|| {}, move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        assert!(session.controller.is_stepping());
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Resume));

        session.push(plain_frame(":FOR ${x} IN [ 1 ]", FrameCategory::For, 1));
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None);
        assert_eq!(session.respond(PausingPoint::StartKeyword), None);
        assert!(!ended.load(Ordering::SeqCst));

        session.push(plain_frame(":FOR iteration ${x} = 1", FrameCategory::ForItem, 1));
        assert_eq!(session.respond(PausingPoint::StartKeyword), Some(ServerResponse::Pause));
        assert!(ended.load(Ordering::SeqCst), "Stepping end callback runs on pause");
    }

    #[test]
    fn test_step_into_does_not_enter_library_keywords() {
        let session = Session::new(false, false);
        session.push(plain_frame("Test", FrameCategory::Test, 0));
        session.controller.step_into(|| {}, || {}).unwrap();
        session.respond(PausingPoint::PreStartKeyword);

        session.push(library_frame("BuiltIn.Log", 0));
        assert_eq!(session.respond(PausingPoint::StartKeyword), None);
        assert_eq!(session.respond(PausingPoint::PreEndKeyword), None);
        session.pop();
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
    }

    #[test]
    fn test_step_into_enters_library_keywords_when_allowed() {
        let session = Session::new(false, true);
        session.push(plain_frame("Test", FrameCategory::Test, 0));
        session.controller.step_into(|| {}, || {}).unwrap();
        session.respond(PausingPoint::PreStartKeyword);

        session.push(library_frame("BuiltIn.Log", 0));
        assert_eq!(session.respond(PausingPoint::PreEndKeyword), Some(ServerResponse::Pause));
    }

    #[test]
    fn test_step_over_inside_loop_pauses_on_next_iteration() {
        let session = Session::new(false, false);
        session.push(plain_frame("Suite", FrameCategory::Suite, 0));
        session.push(plain_frame("Test", FrameCategory::Test, 1));
        let for_id = session.push(plain_frame(":FOR ${x} IN [ 1 | 2 ]", FrameCategory::For, 1));
        let item = session.push(plain_frame(":FOR iteration ${x} = 1", FrameCategory::ForItem, 1));

        // paused on start of the first iteration
        assert_eq!(session.respond(PausingPoint::StartKeyword), None);
        session.controller.step_over(item, || {}, || {}).unwrap();
        assert_eq!(
            session.controller.suspension(),
            Some(SuspensionKind::Stepping(SteppingMode::Over))
        );
        assert!(session.stack.lock().frame(for_id).unwrap().is_marked_stepping());
        assert_eq!(session.respond(PausingPoint::StartKeyword), Some(ServerResponse::Resume));

        session.push(plain_frame("Log", FrameCategory::Keyword, 2));
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None, "Nested keyword is stepped over");
        session.pop();
        assert_eq!(session.respond(PausingPoint::PreEndKeyword), None);
        session.pop();

        session.push(plain_frame(":FOR iteration ${x} = 2", FrameCategory::ForItem, 1));
        assert_eq!(session.respond(PausingPoint::StartKeyword), Some(ServerResponse::Pause));

        session.controller.execution_paused();
        assert!(!session.stack.lock().iter().any(StackFrame::is_marked_stepping));
    }

    #[test]
    fn test_step_over_pauses_on_next_keyword_of_same_frame() {
        let session = Session::new(false, false);
        let test = session.push(plain_frame("Test", FrameCategory::Test, 0));

        session.respond(PausingPoint::PreStartKeyword);
        session.controller.step_over(test, || {}, || {}).unwrap();
        session.respond(PausingPoint::PreStartKeyword);

        session.push(plain_frame("My Keyword", FrameCategory::Keyword, 1));
        assert_eq!(session.respond(PausingPoint::StartKeyword), None);
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None);
        session.pop();
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), Some(ServerResponse::Pause));
    }

    #[test]
    fn test_step_return_pauses_after_frame_is_left() {
        let session = Session::new(false, false);
        session.push(plain_frame("Test", FrameCategory::Test, 0));
        let keyword = session.push(plain_frame("My Keyword", FrameCategory::Keyword, 1));

        session.controller.step_return(keyword, || {}, || {}).unwrap();
        session.respond(PausingPoint::PreStartKeyword);

        session.push(plain_frame("Inner", FrameCategory::Keyword, 2));
        assert_eq!(session.respond(PausingPoint::PreStartKeyword), None);
        session.pop();
        assert_eq!(session.respond(PausingPoint::PreEndKeyword), None);
        session.pop();
        assert_eq!(session.respond(PausingPoint::PreEndKeyword), Some(ServerResponse::Pause));
    }

    #[test]
    fn test_stepping_unknown_frame_fails() {
        let session = Session::new(false, false);
        session.push(plain_frame("Test", FrameCategory::Test, 0));
        let stranger = plain_frame("Elsewhere", FrameCategory::Keyword, 3).id();

        let result = session.controller.step_return(stranger, || {}, || {});
        assert!(matches!(result, Err(DebuggerError::UnknownFrame(id)) if id == stranger));
    }

    #[test]
    fn test_variable_change_is_sent_with_frame_level() {
        let session = Session::new(false, false);
        session.push(plain_frame("Suite", FrameCategory::Suite, 0));
        let keyword = session.push(plain_frame("My Keyword", FrameCategory::Keyword, 2));
        let variable = StackFrameVariable::new(VariableScope::Local, false, "${x}", "int", json!(1));

        session
            .controller
            .change_variable(keyword, &variable, vec!["5".into()])
            .unwrap();
        assert_eq!(session.controller.suspension(), Some(SuspensionKind::VariableChange(2)));
        assert_eq!(
            session.respond(PausingPoint::PreStartKeyword),
            Some(ServerResponse::ChangeVariable {
                name: "${x}".into(),
                scope: VariableScope::Local,
                level: 2,
                path: vec![],
                arguments: vec!["5".into()],
            })
        );
    }

    #[test]
    fn test_inner_value_change_carries_path() {
        let session = Session::new(false, false);
        let test = session.push(plain_frame("Test", FrameCategory::Test, 1));
        let variable = StackFrameVariable::new(
            VariableScope::TestCase,
            false,
            "&{d}",
            "dict",
            json!({"k": [1, 2]}),
        );

        session
            .controller
            .change_variable_inner_value(test, &variable, vec![json!("k"), json!(1)], vec!["3".into()])
            .unwrap();
        let response = session.respond(PausingPoint::PreStartKeyword).unwrap();
        assert_eq!(
            response.to_json(),
            json!({"change_variable": {
                "name": "&{d}", "scope": "TEST_CASE", "level": 1,
                "path": ["k", 1], "arguments": ["3"]
            }})
        );
    }
}
