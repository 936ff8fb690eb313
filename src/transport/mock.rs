use std::collections::VecDeque;

use super::{ByteTransport, TransportError};

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;
type FailWhen = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Scripted transport for tests. Records every send; a responder can queue
/// a reply for a given send, and `fail_when` turns a send into a timeout.
/// Queued receive errors are returned before any queued bytes.
pub(crate) struct MockTransport {
    pub sent: Vec<Vec<u8>>,
    pub incoming: VecDeque<Vec<u8>>,
    pub open: bool,
    responder: Option<Responder>,
    fail_when: Option<FailWhen>,
    receive_errors: VecDeque<TransportError>,
    stalled: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            incoming: VecDeque::new(),
            open: false,
            responder: None,
            fail_when: None,
            receive_errors: VecDeque::new(),
            stalled: false,
        }
    }

    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn fail_when<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.fail_when = Some(Box::new(f));
        self
    }

    /// Always report data waiting, but never deliver any.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn fail_next_receive(&mut self, err: TransportError) {
        self.receive_errors.push_back(err);
    }

    pub fn queue(&mut self, bytes: impl Into<Vec<u8>>) {
        self.incoming.push_back(bytes.into());
    }

    /// Sends that look like monitor commands, as strings.
    pub fn commands(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter(|s| s.last() == Some(&b'#'))
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }
}

impl ByteTransport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if let Some(fail) = self.fail_when.as_mut() {
            if fail(bytes) {
                return Err(TransportError::Timeout);
            }
        }
        self.sent.push(bytes.to_vec());
        if let Some(respond) = self.responder.as_mut() {
            if let Some(reply) = respond(bytes) {
                self.incoming.push_back(reply);
            }
        }
        Ok(())
    }

    fn has_data_waiting(&mut self) -> Result<bool, TransportError> {
        Ok(self.stalled || !self.receive_errors.is_empty() || !self.incoming.is_empty())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if let Some(err) = self.receive_errors.pop_front() {
            return Err(err);
        }
        if self.stalled {
            return Ok(0);
        }
        let Some(mut chunk) = self.incoming.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.incoming.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
