//! In-memory device adapter for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::executor::{AdapterError, DeviceAdapter};

enum Scripted {
    Output(Option<String>, Duration),
    Error(AdapterError),
}

/// Scripted [`DeviceAdapter`].
///
/// Responses are taken from a FIFO queue; once the queue is empty, the first
/// matching rule registered with [`on_command`](Self::on_command) answers,
/// and otherwise the adapter returns no output. Every shell command received
/// is recorded.
pub struct MockAdapter {
    name: String,
    connected: AtomicBool,
    queue: Mutex<VecDeque<Scripted>>,
    rules: Mutex<Vec<(String, String)>>,
    commands: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::with_name("mock-device")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
            rules: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn push_output(&self, output: impl Into<String>) {
        self.queue
            .lock()
            .push_back(Scripted::Output(Some(output.into()), Duration::ZERO));
    }

    /// Queue an output that is returned after `delay`.
    pub fn push_delayed(&self, output: impl Into<String>, delay: Duration) {
        self.queue
            .lock()
            .push_back(Scripted::Output(Some(output.into()), delay));
    }

    pub fn push_no_output(&self) {
        self.queue
            .lock()
            .push_back(Scripted::Output(None, Duration::ZERO));
    }

    pub fn push_error(&self, error: AdapterError) {
        self.queue.lock().push_back(Scripted::Error(error));
    }

    /// Answer every command containing `pattern` with `output`.
    pub fn on_command(&self, pattern: impl Into<String>, output: impl Into<String>) {
        self.rules.lock().push((pattern.into(), output.into()));
    }

    /// Shell commands received so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.commands.lock().len()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn shell(&self, command: &str) -> Result<Option<String>, AdapterError> {
        self.commands.lock().push(command.to_string());

        let scripted = self.queue.lock().pop_front();
        match scripted {
            Some(Scripted::Output(output, delay)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(output)
            }
            Some(Scripted::Error(e)) => Err(e),
            None => Ok(self
                .rules
                .lock()
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, output)| output.clone())),
        }
    }
}
