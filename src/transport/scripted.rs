//! Deterministic in-memory transport for tests.
//!
//! A [`ScriptedTransport`] is a cheap handle onto shared state: hand one
//! clone to the multiplexer and keep another to decide when each operation
//! finishes.
//!
//! ```ignore
//! let transport = ScriptedTransport::new();
//! let mut mux = Multiplexer::new(transport.clone());
//!
//! mux.start("a", RequestDescriptor::query("SELECT 1"), vec![])?;
//! let id = mux.handle("a").unwrap();
//! transport.complete(id, 200, "1\n");
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;

use super::error::TransportFailure;
use super::request::RequestDescriptor;
use super::{Completion, OperationId, Readiness, Transport};

/// What a responder decides for a freshly submitted request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Finish with this status and body on the next drain.
    Respond(u16, Bytes),
    /// Finish with a transport failure on the next drain.
    Fail(TransportFailure),
    /// Leave the operation running.
    Hold,
}

type Responder = Box<dyn FnMut(&RequestDescriptor) -> Reply>;

#[derive(Default)]
struct Script {
    next_id: u64,
    submitted: Vec<(OperationId, RequestDescriptor)>,
    running: Vec<OperationId>,
    queued: VecDeque<Completion>,
    closed: Vec<OperationId>,
    reject_next: Option<TransportFailure>,
    responder: Option<Responder>,
    contexts_created: usize,
    connected: bool,
}

/// Transport whose completions are decided by the test.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every submitted request through `responder`.
    pub fn with_responder(responder: impl FnMut(&RequestDescriptor) -> Reply + 'static) -> Self {
        let transport = Self::new();
        transport.script.borrow_mut().responder = Some(Box::new(responder));
        transport
    }

    /// Queue a successful completion for `id`.
    pub fn complete(&self, id: OperationId, status: u16, body: impl Into<Bytes>) {
        self.queue(Completion::success(id, status, body));
    }

    /// Queue a transport failure for `id`.
    pub fn fail(&self, id: OperationId, failure: TransportFailure) {
        self.queue(Completion::failure(id, failure));
    }

    /// Queue an arbitrary completion.
    pub fn queue(&self, completion: Completion) {
        self.script.borrow_mut().queued.push_back(completion);
    }

    /// Make the next `submit` fail synchronously.
    pub fn reject_next(&self, failure: TransportFailure) {
        self.script.borrow_mut().reject_next = Some(failure);
    }

    /// Every request accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<(OperationId, RequestDescriptor)> {
        self.script.borrow().submitted.clone()
    }

    /// Operations released through `close`.
    pub fn closed(&self) -> Vec<OperationId> {
        self.script.borrow().closed.clone()
    }

    /// Number of times the shared context was (re)created.
    pub fn contexts_created(&self) -> usize {
        self.script.borrow().contexts_created
    }

    pub fn is_connected(&self) -> bool {
        self.script.borrow().connected
    }
}

impl Transport for ScriptedTransport {
    fn submit(&mut self, request: RequestDescriptor) -> Result<OperationId, TransportFailure> {
        let mut script = self.script.borrow_mut();
        if !script.connected {
            script.connected = true;
            script.contexts_created += 1;
        }
        if let Some(failure) = script.reject_next.take() {
            return Err(failure);
        }

        script.next_id += 1;
        let id = OperationId(script.next_id);
        script.running.push(id);

        let reply = match script.responder.as_mut() {
            Some(responder) => responder(&request),
            None => Reply::Hold,
        };
        match reply {
            Reply::Respond(status, body) => {
                script.queued.push_back(Completion::success(id, status, body))
            }
            Reply::Fail(failure) => script.queued.push_back(Completion::failure(id, failure)),
            Reply::Hold => {}
        }

        script.submitted.push((id, request));
        Ok(id)
    }

    fn drain(&mut self) -> Vec<Completion> {
        let mut script = self.script.borrow_mut();
        let queued: Vec<Completion> = script.queued.drain(..).collect();

        let mut finished = Vec::with_capacity(queued.len());
        for completion in queued {
            if let Some(pos) = script.running.iter().position(|id| *id == completion.id) {
                script.running.remove(pos);
                finished.push(completion);
            }
        }
        finished
    }

    fn wait(&mut self, _timeout: Duration) -> Readiness {
        if self.script.borrow().queued.is_empty() {
            Readiness::Unsupported
        } else {
            Readiness::Ready
        }
    }

    fn running(&self) -> usize {
        self.script.borrow().running.len()
    }

    fn close(&mut self, id: OperationId) {
        let mut script = self.script.borrow_mut();
        script.running.retain(|running| *running != id);
        script.queued.retain(|completion| completion.id != id);
        script.closed.push(id);
    }

    fn teardown(&mut self) {
        let mut script = self.script.borrow_mut();
        script.running.clear();
        script.queued.clear();
        script.connected = false;
    }
}
