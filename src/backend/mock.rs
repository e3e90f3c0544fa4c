//! Scriptable backend for tests.
//!
//! [`MockBackend`] implements the backend capability against in-memory
//! queues instead of a real link. The paired [`MockHandle`] stays with the
//! test after the backend is boxed and moved into the daemon, so tests can
//! feed inbound data, inspect what was sent, and flip connectivity while
//! the daemon runs.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Backend, BackendError};

#[derive(Default)]
struct Shared {
    connected: bool,
    recv_queue: VecDeque<Vec<u8>>,
    sent: Vec<u8>,
    /// Cap on bytes accepted per `send` call, to exercise partial sends.
    send_limit: Option<usize>,
    fail_sends: bool,
    fail_recvs: bool,
}

pub struct MockBackend {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side handle to a [`MockBackend`]'s state.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockBackend {
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockHandle { shared },
        )
    }
}

impl MockHandle {
    /// Queue a chunk the backend will hand out on a later `recv`.
    pub fn push_recv(&self, data: &[u8]) {
        self.shared
            .lock()
            .unwrap()
            .recv_queue
            .push_back(data.to_vec());
    }

    /// Everything sent through the backend so far.
    pub fn sent(&self) -> Vec<u8> {
        self.shared.lock().unwrap().sent.clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().unwrap().connected = connected;
    }

    /// Make every `send` accept at most `limit` bytes.
    pub fn set_send_limit(&self, limit: Option<usize>) {
        self.shared.lock().unwrap().send_limit = limit;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.lock().unwrap().fail_sends = fail;
    }

    pub fn fail_recvs(&self, fail: bool) {
        self.shared.lock().unwrap().fail_recvs = fail;
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn establish(&mut self) -> Result<(), BackendError> {
        self.shared.lock().unwrap().connected = true;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, BackendError> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.connected {
            return Err(BackendError::NotEstablished);
        }
        if shared.fail_sends {
            return Err(BackendError::Io(io::Error::other("scripted send failure")));
        }
        let accepted = shared.send_limit.map_or(data.len(), |limit| {
            limit.min(data.len())
        });
        shared.sent.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    async fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, BackendError> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.connected {
            return Err(BackendError::NotEstablished);
        }
        if shared.fail_recvs {
            return Err(BackendError::Io(io::Error::other("scripted recv failure")));
        }
        match shared.recv_queue.pop_front() {
            None => Ok(Vec::new()),
            Some(mut chunk) => {
                if chunk.len() > max_len {
                    let rest = chunk.split_off(max_len);
                    shared.recv_queue.push_front(rest);
                }
                Ok(chunk)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().unwrap().connected
    }
}
