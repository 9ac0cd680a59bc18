use std::io::{BufRead, Write};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::protocol::{AgentEvent, ServerResponse};
use crate::controller::{PendingResponse, ProcessController};
use crate::debugger::StacktraceBuilder;
use crate::error::Result;

/// Sends decisions back to the agent.
pub trait Responder {
    fn respond(&mut self, response: &ServerResponse) -> Result<()>;

    /// Answers once the user acts; `default` is sent when nobody ever will.
    ///
    /// The default implementation blocks the calling event thread until then. A transport
    /// that must keep reading events while paused overrides this and waits elsewhere.
    fn respond_asynchronously(
        &mut self,
        pending: PendingResponse,
        default: ServerResponse,
    ) -> Result<()> {
        let response = pending.wait().unwrap_or(default);
        self.respond(&response)
    }
}

impl Responder for Vec<ServerResponse> {
    fn respond(&mut self, response: &ServerResponse) -> Result<()> {
        self.push(response.clone());
        Ok(())
    }
}

/// Writes one JSON response per line.
pub struct JsonLinesResponder<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesResponder<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Responder for JsonLinesResponder<W> {
    fn respond(&mut self, response: &ServerResponse) -> Result<()> {
        serde_json::to_writer(&mut self.out, response)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Running,
    Closed,
}

/// Routes agent events to the stack builder and the process controller.
pub struct AgentEventDispatcher<R: Responder> {
    builder: StacktraceBuilder,
    controller: Arc<dyn ProcessController>,
    responder: R,
}

impl<R: Responder> AgentEventDispatcher<R> {
    pub fn new(
        builder: StacktraceBuilder,
        controller: Arc<dyn ProcessController>,
        responder: R,
    ) -> Self {
        Self {
            builder,
            controller,
            responder,
        }
    }

    pub fn builder(&self) -> &StacktraceBuilder {
        &self.builder
    }

    pub fn responder(&self) -> &R {
        &self.responder
    }

    pub fn into_responder(self) -> R {
        self.responder
    }

    pub fn dispatch(&mut self, event: AgentEvent) -> Result<DispatchOutcome> {
        trace!(?event, "agent event");
        match event {
            AgentEvent::Version(e) => self.builder.handle_version(&e),
            AgentEvent::ResourceImport(e) => self.builder.handle_resource_import(&e)?,
            AgentEvent::SuiteStarted(e) => self.builder.handle_suite_started(&e),
            AgentEvent::SuiteEnded(e) => self.builder.handle_suite_ended(&e),
            AgentEvent::TestStarted(e) => self.builder.handle_test_started(&e),
            AgentEvent::TestEnded(e) => self.builder.handle_test_ended(&e),
            AgentEvent::PreStartKeyword(e) => self.builder.handle_keyword_about_to_start(&e)?,
            AgentEvent::StartKeyword(e) => self.builder.handle_keyword_started(&e)?,
            AgentEvent::PreEndKeyword(e) => self.builder.handle_keyword_about_to_end(&e),
            AgentEvent::EndKeyword(e) => self.builder.handle_keyword_ended(&e),
            AgentEvent::Variables(e) => self.builder.handle_variables(&e),
            AgentEvent::ShouldContinue(e) => {
                let response = self
                    .controller
                    .take_current_response(e.pausing_point)
                    .unwrap_or(ServerResponse::Continue);
                debug!(pausing_point = ?e.pausing_point, response = response.name(), "answering agent");
                self.responder.respond(&response)?;
            }
            AgentEvent::ConditionResult(e) => self.controller.condition_evaluated(e.outcome()),
            AgentEvent::Paused => {
                self.controller.execution_paused();
                let pending = self.controller.take_future_response();
                self.responder
                    .respond_asynchronously(pending, ServerResponse::Continue)?;
            }
            AgentEvent::Closed => {
                self.builder.handle_closed();
                self.controller.close();
                return Ok(DispatchOutcome::Closed);
            }
        }
        Ok(DispatchOutcome::Running)
    }

    /// Consumes newline separated events until the stream ends or the agent closes.
    /// Returns the number of dispatched events.
    pub fn run<B: BufRead>(&mut self, reader: B) -> Result<usize> {
        let mut dispatched = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let event: AgentEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(err) => {
                    warn!(line = index + 1, %err, "malformed agent event");
                    return Err(err.into());
                }
            };
            dispatched += 1;
            if self.dispatch(event)? == DispatchOutcome::Closed {
                break;
            }
        }
        Ok(dispatched)
    }
}
