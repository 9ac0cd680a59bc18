mod debug;

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::agent::ServerResponse;
use crate::debugger::PausingPoint;
use crate::error::{DebuggerError, Result};

pub use debug::{DebuggerPreferences, PauseReasonListener, SuspensionKind, UserProcessDebugController};

/// Runs once the response it is attached to has been handed to the agent.
pub type Callback = Box<dyn FnOnce() + Send>;

const OFFER_ATTEMPTS: usize = 10;

pub struct ResponseWithCallback {
    response: ServerResponse,
    callback: Callback,
}

impl ResponseWithCallback {
    pub fn new(response: ServerResponse, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            response,
            callback: Box::new(callback),
        }
    }

    fn deliver(self) -> ServerResponse {
        (self.callback)();
        self.response
    }
}

impl fmt::Debug for ResponseWithCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWithCallback")
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SlotState {
    response: Option<ResponseWithCallback>,
    closed: bool,
}

/// Holds at most one manual response.
#[derive(Default)]
struct ResponseSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// Response which becomes available once the user acts.
pub struct PendingResponse {
    slot: Arc<ResponseSlot>,
}

impl PendingResponse {
    /// Blocks until a manual response is queued. `None` once the controller was closed.
    pub fn wait(self) -> Option<ServerResponse> {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(queued) = state.response.take() {
                drop(state);
                return Some(queued.deliver());
            }
            if state.closed {
                return None;
            }
            self.slot.ready.wait(&mut state);
        }
    }

    pub fn wait_timeout(self, timeout: Duration) -> Option<ServerResponse> {
        let mut state = self.slot.state.lock();
        if state.response.is_none() && !state.closed {
            self.slot.ready.wait_for(&mut state, timeout);
        }
        let queued = state.response.take();
        drop(state);
        queued.map(ResponseWithCallback::deliver)
    }
}

/// Decision making for the agent's pausing points.
pub trait ProcessController: Send + Sync {
    fn take_current_response(&self, pausing_point: PausingPoint) -> Option<ServerResponse>;

    fn take_future_response(&self) -> PendingResponse;

    fn execution_paused(&self);

    fn condition_evaluated(&self, outcome: std::result::Result<bool, String>);

    /// Releases everyone waiting for a future response.
    fn close(&self);
}

/// Controller of a run without debugging: only forwards manual user requests.
#[derive(Clone, Default)]
pub struct UserProcessController {
    manual: Arc<ResponseSlot>,
}

impl UserProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a manual response. A second response offered before the first one is taken
    /// means the caller lost track of the protocol and is reported as an error.
    pub fn offer(&self, queued: ResponseWithCallback) -> Result<()> {
        let mut queued = Some(queued);
        for attempt in 1..=OFFER_ATTEMPTS {
            let mut state = self.manual.state.lock();
            if state.response.is_none() {
                state.response = queued.take();
                drop(state);
                self.manual.ready.notify_all();
                trace!(attempt, "manual response queued");
                return Ok(());
            }
            drop(state);
            thread::yield_now();
        }
        debug!("manual response rejected; another one is still pending");
        Err(DebuggerError::ResponseQueueFull)
    }

    pub fn pending_responses(&self) -> usize {
        usize::from(self.manual.state.lock().response.is_some())
    }

    fn take_queued(&self) -> Option<ResponseWithCallback> {
        self.manual.state.lock().response.take()
    }

    fn offer_response(
        &self,
        response: ServerResponse,
        when_sent: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.offer(ResponseWithCallback::new(response, when_sent))
    }

    pub fn pause(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.offer_response(ServerResponse::Pause, when_sent)
    }

    pub fn resume(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.offer_response(ServerResponse::Resume, when_sent)
    }

    pub fn terminate(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.offer_response(ServerResponse::Terminate, when_sent)
    }

    pub fn disconnect(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.offer_response(ServerResponse::Disconnect, when_sent)
    }

    pub fn interrupt(&self, when_sent: impl FnOnce() + Send + 'static) -> Result<()> {
        self.offer_response(ServerResponse::Interrupt, when_sent)
    }
}

impl ProcessController for UserProcessController {
    fn take_current_response(&self, _pausing_point: PausingPoint) -> Option<ServerResponse> {
        self.take_queued().map(ResponseWithCallback::deliver)
    }

    fn take_future_response(&self) -> PendingResponse {
        PendingResponse {
            slot: self.manual.clone(),
        }
    }

    fn execution_paused(&self) {}

    fn condition_evaluated(&self, _outcome: std::result::Result<bool, String>) {}

    fn close(&self) {
        self.manual.state.lock().closed = true;
        self.manual.ready.notify_all();
    }
}
