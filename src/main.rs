use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use robot_debugger::agent::{AgentEventDispatcher, JsonLinesResponder};
use robot_debugger::config::LaunchConfig;
use robot_debugger::console::{Command, HELP};
use robot_debugger::controller::{PauseReasonListener, ProcessController, UserProcessDebugController};
use robot_debugger::debugger::{
    FrameId, LineBreakpoint, ModelLocator, Stacktrace, StacktraceBuilder,
};
use robot_debugger::{DebuggerError, Result};

const USAGE: &str = "usage: robot-debugger [--config launch.json] [--model model.json] <events.jsonl>";
const LOG_ENV: &str = "RED_DEBUG_LOG";

struct CliArgs {
    config: Option<PathBuf>,
    model: Option<PathBuf>,
    events: PathBuf,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let mut config = None;
    let mut model = None;
    let mut events = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = args.next().map(PathBuf::from),
            "--model" => model = args.next().map(PathBuf::from),
            flag if flag.starts_with("--") => {
                return Err(DebuggerError::Command(format!("unknown option {flag}\n{USAGE}")))
            }
            path => events = Some(PathBuf::from(path)),
        }
    }
    let events = events.ok_or_else(|| DebuggerError::Command(USAGE.to_string()))?;
    Ok(CliArgs {
        config,
        model,
        events,
    })
}

fn init_logging(config: &LaunchConfig) {
    // stdout carries agent responses, so logs go to stderr
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(config.log_filter.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Reports each suspension on the console together with the frame it happened in.
struct ConsoleReporter {
    stack: Arc<Mutex<Stacktrace>>,
}

impl ConsoleReporter {
    fn report(&self, reason: &str) {
        let stack = self.stack.lock();
        eprintln!("\n🔍 Paused: {reason}");
        if let Some(frame) = stack.peek_current_frame() {
            eprintln!("    {frame}");
        }
        eprintln!("{HELP}");
    }
}

impl PauseReasonListener for ConsoleReporter {
    fn paused_on_breakpoint(&self, breakpoint: &LineBreakpoint) {
        self.report(&format!("breakpoint at {}:{}", breakpoint.path(), breakpoint.line()));
    }

    fn paused_by_user(&self) {
        self.report("user request");
    }

    fn paused_by_stepping(&self) {
        self.report("step");
    }

    fn paused_on_error(&self, error: &str) {
        self.report(&format!("error\n    {}", error.trim_end()));
    }

    fn paused_after_variable_change(&self, frame_level: usize) {
        self.report(&format!("variable changed in frame at level {frame_level}"));
    }
}

fn top_frame(stack: &Mutex<Stacktrace>) -> Result<FrameId> {
    stack
        .lock()
        .peek_current_frame()
        .map(|frame| frame.id())
        .ok_or(DebuggerError::EmptyStacktrace)
}

fn print_stack(stack: &Stacktrace) {
    if stack.is_empty() {
        eprintln!("(empty stack)");
    }
    for frame in stack {
        eprintln!("  {frame}");
    }
}

fn print_variables(stack: &Stacktrace) -> Result<()> {
    let frame = stack.peek_current_frame().ok_or(DebuggerError::EmptyStacktrace)?;
    let Some(variables) = frame.variables() else {
        eprintln!("(no variables reported yet)");
        return Ok(());
    };
    for variable in variables.iter().filter(|variable| !variable.is_automatic()) {
        eprintln!(
            "  {} = {} ({}, {:?})",
            variable.name(),
            variable.value(),
            variable.type_name(),
            variable.scope()
        );
    }
    Ok(())
}

fn execute(
    command: Command,
    controller: &UserProcessDebugController,
    stack: &Mutex<Stacktrace>,
) -> Result<()> {
    let stepping_ended = || info!("stepping ended");
    match command {
        Command::Continue => controller.resume(|| {}),
        Command::Pause => controller.pause(|| {}),
        Command::StepInto => controller.step_into(|| {}, stepping_ended),
        Command::StepOver => controller.step_over(top_frame(stack)?, || {}, stepping_ended),
        Command::StepReturn => controller.step_return(top_frame(stack)?, || {}, stepping_ended),
        Command::Terminate => controller.terminate(|| {}),
        Command::Disconnect => controller.disconnect(|| {}),
        Command::Stack => {
            print_stack(&stack.lock());
            Ok(())
        }
        Command::Variables => print_variables(&stack.lock()),
        Command::SetVariable { name, arguments } => {
            let (frame, variable) = {
                let stack = stack.lock();
                let frame = stack.peek_current_frame().ok_or(DebuggerError::EmptyStacktrace)?;
                let variable = frame
                    .variables()
                    .and_then(|variables| variables.get(&name))
                    .map(|variable| variable.copy())
                    .ok_or_else(|| DebuggerError::Command(format!("unknown variable {name}")))?;
                (frame.id(), variable)
            };
            controller.change_variable(frame, &variable, arguments)
        }
    }
}

/// Reads console commands until stdin closes, then lets the agent run freely.
fn spawn_console(controller: Arc<UserProcessDebugController>, stack: Arc<Mutex<Stacktrace>>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut input = String::new();
        loop {
            eprint!("> ");
            let _ = io::stderr().flush();
            input.clear();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "unable to read console input");
                    break;
                }
            }
            let outcome = Command::parse(&input)
                .and_then(|command| execute(command, &controller, &stack));
            if let Err(err) = outcome {
                eprintln!("❌ {err}");
            }
        }
        info!("console closed; remaining pauses continue automatically");
        controller.close();
    });
}

fn run() -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => LaunchConfig::from_file(path)?,
        None => LaunchConfig::default(),
    };
    init_logging(&config);

    let locator = match args.model.clone().or_else(|| config.model_path()) {
        Some(path) => ModelLocator::from_file(path)?,
        None => ModelLocator::default(),
    };
    let breakpoints = config.breakpoints()?;
    info!(breakpoints = breakpoints.len(), events = %args.events.display(), "starting replay");

    let stack = Arc::new(Mutex::new(Stacktrace::new()));
    let builder = StacktraceBuilder::new(stack.clone(), Arc::new(locator), Arc::new(breakpoints));
    let controller = Arc::new(UserProcessDebugController::new(
        stack.clone(),
        config.debugger_preferences(),
    ));
    controller.when_suspended(Arc::new(ConsoleReporter {
        stack: stack.clone(),
    }));
    spawn_console(controller.clone(), stack);

    let events = BufReader::new(File::open(&args.events)?);
    let responder = JsonLinesResponder::new(io::stdout());
    let mut dispatcher =
        AgentEventDispatcher::new(builder, controller.clone() as Arc<dyn ProcessController>, responder);
    let dispatched = dispatcher.run(events)?;
    controller.close();
    info!(dispatched, "replay finished");
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ {err}");
            ExitCode::FAILURE
        }
    }
}
