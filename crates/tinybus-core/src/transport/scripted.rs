//! Scripted transport for unit tests.
//!
//! Records every sent message and answers from a script: queued inbound
//! messages plus an optional responder invoked on each send. Once the script
//! runs dry, `recv` fails with a connection error instead of hanging.

use super::Transport;
use crate::error::{BusError, Result};
use crate::message::{MatchRule, Message, RequestNameReply};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Responder = Box<dyn FnMut(&Message) -> Vec<Message> + Send>;

struct ScriptState {
    hello: std::result::Result<Option<String>, String>,
    name_reply: RequestNameReply,
    send_failure: Option<String>,
    sent: Vec<Message>,
    matches: Vec<MatchRule>,
    inbox: VecDeque<Message>,
    responder: Option<Responder>,
    diagnostic: Option<String>,
    flushes: usize,
}

pub(crate) struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

/// Test-side view of a [`ScriptedTransport`].
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Self, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState {
            hello: Ok(Some(":1.1".to_string())),
            name_reply: RequestNameReply::PrimaryOwner,
            send_failure: None,
            sent: Vec::new(),
            matches: Vec::new(),
            inbox: VecDeque::new(),
            responder: None,
            diagnostic: None,
            flushes: 0,
        }));
        (
            Self {
                state: state.clone(),
            },
            ScriptHandle { state },
        )
    }
}

impl ScriptHandle {
    pub(crate) fn fail_hello(&self, diagnostic: &str) {
        self.state.lock().unwrap().hello = Err(diagnostic.to_string());
    }

    pub(crate) fn anonymous_hello(&self) {
        self.state.lock().unwrap().hello = Ok(None);
    }

    pub(crate) fn set_name_reply(&self, reply: RequestNameReply) {
        self.state.lock().unwrap().name_reply = reply;
    }

    pub(crate) fn fail_sends(&self, diagnostic: &str) {
        self.state.lock().unwrap().send_failure = Some(diagnostic.to_string());
    }

    pub(crate) fn push_inbound(&self, message: Message) {
        self.state.lock().unwrap().inbox.push_back(message);
    }

    pub(crate) fn respond_with(
        &self,
        responder: impl FnMut(&Message) -> Vec<Message> + Send + 'static,
    ) {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.state.lock().unwrap().sent.clone()
    }

    pub(crate) fn matches(&self) -> Vec<MatchRule> {
        self.state.lock().unwrap().matches.clone()
    }

    pub(crate) fn flushes(&self) -> usize {
        self.state.lock().unwrap().flushes
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn hello(&mut self) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        match state.hello.clone() {
            Ok(name) => Ok(name),
            Err(diagnostic) => {
                state.diagnostic = Some(diagnostic.clone());
                Err(BusError::connection(diagnostic))
            }
        }
    }

    async fn request_name(&mut self, _name: &str) -> Result<RequestNameReply> {
        Ok(self.state.lock().unwrap().name_reply)
    }

    async fn add_match(&mut self, rule: &MatchRule) -> Result<()> {
        self.state.lock().unwrap().matches.push(rule.clone());
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(diagnostic) = state.send_failure.clone() {
            state.diagnostic = Some(diagnostic.clone());
            return Err(BusError::send(diagnostic));
        }
        let replies = match state.responder.as_mut() {
            Some(responder) => responder(&message),
            None => Vec::new(),
        };
        state.sent.push(message);
        state.inbox.extend(replies);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.state.lock().unwrap().flushes += 1;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        self.state
            .lock()
            .unwrap()
            .inbox
            .pop_front()
            .ok_or_else(|| BusError::connection("script exhausted"))
    }

    fn take_diagnostic(&mut self) -> Option<String> {
        self.state.lock().unwrap().diagnostic.take()
    }
}
