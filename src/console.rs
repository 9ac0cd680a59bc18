use crate::error::{DebuggerError, Result};

/// User command typed into the debugger console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Continue,
    Pause,
    StepInto,
    StepOver,
    StepReturn,
    Terminate,
    Disconnect,
    Stack,
    Variables,
    SetVariable { name: String, arguments: Vec<String> },
}

pub const HELP: &str = "Commands: (c)ontinue, (p)ause, (s)tepInto, (n)ext/stepOver, (o)ut/stepReturn, \
(t)erminate, (d)isconnect, bt/stack, vars, set <var> <args...>";

impl Command {
    /// Parses one console line. Arguments are split the way a shell would, so
    /// `set ${x} "two words"` carries a single argument.
    pub fn parse(line: &str) -> Result<Command> {
        let Some(words) = shlex::split(line.trim()) else {
            return Err(DebuggerError::Command(format!("unbalanced quotes in '{}'", line.trim())));
        };
        let mut words = words.into_iter();
        let Some(first) = words.next() else {
            // empty input steps into, like pressing enter in a shell debugger
            return Ok(Command::StepInto);
        };

        let command = match first.as_str() {
            "c" | "continue" => Command::Continue,
            "p" | "pause" => Command::Pause,
            "s" | "stepIn" | "stepInto" => Command::StepInto,
            "n" | "next" | "stepOver" => Command::StepOver,
            "o" | "out" | "stepReturn" => Command::StepReturn,
            "t" | "terminate" => Command::Terminate,
            "d" | "disconnect" => Command::Disconnect,
            "bt" | "stack" => Command::Stack,
            "vars" => Command::Variables,
            "set" => {
                let name = words
                    .next()
                    .ok_or_else(|| DebuggerError::Command("set requires a variable name".into()))?;
                let arguments: Vec<String> = words.by_ref().collect();
                if arguments.is_empty() {
                    return Err(DebuggerError::Command(format!("no value given for {name}")));
                }
                return Ok(Command::SetVariable { name, arguments });
            }
            other => return Err(DebuggerError::Command(format!("unknown command '{other}'"))),
        };

        if let Some(extra) = words.next() {
            return Err(DebuggerError::Command(format!("unexpected argument '{extra}' for {first}")));
        }
        Ok(command)
    }
}
