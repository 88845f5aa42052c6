//! In-memory printer
//!
//! A [`VirtualPrinter`] is the far end of one or more [`VirtualPort`]s. Tests
//! push firmware lines with [`VirtualPrinter::send_line`] and inspect what the
//! host wrote with [`VirtualPrinter::written`]. An optional responder answers
//! every written line automatically.

use super::{Transport, TransportFactory};
use crate::protocol::parse_frame;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use printlink_core::{ConnectionError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Answers a written line; receives the line and the port's baud rate.
pub type Responder = Arc<dyn Fn(&str, u32) -> Vec<String> + Send + Sync>;

struct Link {
    to_host_tx: mpsc::UnboundedSender<String>,
    to_host_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    written: Mutex<Vec<String>>,
    written_notify: Notify,
    responder: RwLock<Option<Responder>>,
    hung_up: AtomicBool,
    hang_up_notify: Notify,
    stall_writes: AtomicBool,
}

/// Scripted printer on the other end of a [`VirtualPort`].
#[derive(Clone)]
pub struct VirtualPrinter {
    link: Arc<Link>,
}

impl Default for VirtualPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPrinter")
            .field("written", &self.link.written.lock().len())
            .finish()
    }
}

impl VirtualPrinter {
    /// A printer that never answers on its own.
    pub fn new() -> Self {
        let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();
        Self {
            link: Arc::new(Link {
                to_host_tx,
                to_host_rx: tokio::sync::Mutex::new(to_host_rx),
                written: Mutex::new(Vec::new()),
                written_notify: Notify::new(),
                responder: RwLock::new(None),
                hung_up: AtomicBool::new(false),
                hang_up_notify: Notify::new(),
                stall_writes: AtomicBool::new(false),
            }),
        }
    }

    /// A printer answering every written line with `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, u32) -> Vec<String> + Send + Sync + 'static,
    {
        let printer = Self::new();
        printer.set_responder(responder);
        printer
    }

    /// A printer acknowledging every line with `ok`.
    pub fn auto_ok() -> Self {
        Self::with_responder(|_, _| vec!["ok".to_string()])
    }

    /// Replace the responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, u32) -> Vec<String> + Send + Sync + 'static,
    {
        *self.link.responder.write() = Some(Arc::new(responder));
    }

    /// Stop answering automatically.
    pub fn clear_responder(&self) {
        *self.link.responder.write() = None;
    }

    /// Queue a line for the host to read.
    pub fn send_line(&self, line: impl Into<String>) {
        self.link.to_host_tx.send(line.into()).ok();
    }

    /// Every line the host wrote, without terminators.
    pub fn written(&self) -> Vec<String> {
        self.link.written.lock().clone()
    }

    /// Written lines with line number and checksum removed.
    pub fn written_commands(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .map(|line| match parse_frame(&line) {
                Some(frame) => frame.command,
                None => line,
            })
            .collect()
    }

    /// Forget the written lines.
    pub fn clear_written(&self) {
        self.link.written.lock().clear();
    }

    /// Wait until `predicate` holds for the written lines.
    pub async fn wait_until<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&[String]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.link.written_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if predicate(&self.link.written.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(&self.link.written.lock());
            }
        }
    }

    /// Wait until at least `count` lines were written.
    pub async fn wait_for_written(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |lines| lines.len() >= count).await
    }

    /// Make every open port report end of stream.
    pub fn hang_up(&self) {
        self.link.hung_up.store(true, Ordering::SeqCst);
        self.link.hang_up_notify.notify_waiters();
    }

    /// Accept no bytes on write until turned off again.
    pub fn stall_writes(&self, stall: bool) {
        self.link.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Open a port connected to this printer.
    pub fn port(&self, name: impl Into<String>, baudrate: u32) -> VirtualPort {
        VirtualPort {
            name: name.into(),
            baudrate,
            link: self.link.clone(),
            closed: AtomicBool::new(false),
            pending: Mutex::new(String::new()),
            cancel: Notify::new(),
        }
    }
}

/// Host side of a [`VirtualPrinter`].
pub struct VirtualPort {
    name: String,
    baudrate: u32,
    link: Arc<Link>,
    closed: AtomicBool,
    pending: Mutex<String>,
    cancel: Notify,
}

impl VirtualPort {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.link.hung_up.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for VirtualPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baudrate(&self) -> u32 {
        self.baudrate
    }

    async fn read_line(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut rx = self.link.to_host_rx.lock().await;
        tokio::select! {
            line = tokio::time::timeout(timeout, rx.recv()) => match line {
                Ok(Some(line)) => {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    Ok(bytes)
                }
                Ok(None) => Err(ConnectionError::Closed.into()),
                Err(_) => {
                    self.check_open()?;
                    Ok(Vec::new())
                }
            },
            _ = self.cancel.notified() => Ok(Vec::new()),
            _ = self.link.hang_up_notify.notified() => Err(ConnectionError::Closed.into()),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        if self.link.stall_writes.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let lines: Vec<String> = {
            let mut pending = self.pending.lock();
            pending.push_str(&String::from_utf8_lossy(data));
            let mut lines = Vec::new();
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                lines.push(line.trim_end_matches(['\r', '\n']).to_string());
            }
            lines
        };

        let responder = self.link.responder.read().clone();
        for line in lines {
            self.link.written.lock().push(line.clone());
            if let Some(responder) = &responder {
                for answer in responder(&line, self.baudrate) {
                    self.link.to_host_tx.send(answer).ok();
                }
            }
        }
        self.link.written_notify.notify_waiters();
        Ok(data.len())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
        Ok(())
    }

    fn cancel_pending_reads(&self) {
        self.cancel.notify_waiters();
    }
}

/// Opens [`VirtualPort`]s on registered printers.
#[derive(Default, Clone)]
pub struct VirtualTransportFactory {
    printers: Arc<RwLock<HashMap<String, VirtualPrinter>>>,
}

impl VirtualTransportFactory {
    /// A factory without printers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `printer` to the port called `port`.
    pub fn add_printer(&self, port: impl Into<String>, printer: VirtualPrinter) {
        self.printers.write().insert(port.into(), printer);
    }

    /// A factory with a single printer on `port`.
    pub fn single(port: impl Into<String>, printer: VirtualPrinter) -> Self {
        let factory = Self::new();
        factory.add_printer(port, printer);
        factory
    }
}

#[async_trait]
impl TransportFactory for VirtualTransportFactory {
    async fn open(
        &self,
        port: &str,
        baudrate: u32,
        _timeout: Duration,
    ) -> Result<Arc<dyn Transport>> {
        let printer = self.printers.read().get(port).cloned();
        match printer {
            Some(printer) => Ok(Arc::new(printer.port(port, baudrate))),
            None => Err(ConnectionError::FailedToOpen {
                port: port.to_string(),
                baudrate,
                reason: "no such port".to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_flow_both_ways() {
        let printer = VirtualPrinter::with_responder(|line, _| {
            if line.contains("M105") {
                vec!["ok T:21.0 /0.0".to_string()]
            } else {
                vec![]
            }
        });
        let port = printer.port("virtual", 115200);

        port.write(b"N1 M105*38\n").await.unwrap();
        assert_eq!(printer.written(), vec!["N1 M105*38"]);
        assert_eq!(printer.written_commands(), vec!["M105"]);

        let line = port.read_line(Duration::from_secs(1)).await.unwrap();
        assert_eq!(line, b"ok T:21.0 /0.0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_returns_empty() {
        let printer = VirtualPrinter::new();
        let port = printer.port("virtual", 115200);
        let line = port.read_line(Duration::from_secs(2)).await.unwrap();
        assert!(line.is_empty());
    }

    #[tokio::test]
    async fn test_partial_writes_are_joined() {
        let printer = VirtualPrinter::new();
        let port = printer.port("virtual", 115200);
        port.write(b"G28").await.unwrap();
        assert!(printer.written().is_empty());
        port.write(b" X\n").await.unwrap();
        assert_eq!(printer.written(), vec!["G28 X"]);
    }

    #[tokio::test]
    async fn test_hang_up_closes_port() {
        let printer = VirtualPrinter::new();
        let port = printer.port("virtual", 115200);
        printer.hang_up();
        let err = port.read_line(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_port() {
        let factory = VirtualTransportFactory::single("/dev/ttyUSB0", VirtualPrinter::new());
        assert!(factory
            .open("/dev/ttyUSB0", 115200, Duration::from_secs(1))
            .await
            .is_ok());
        assert!(factory
            .open("/dev/ttyUSB9", 115200, Duration::from_secs(1))
            .await
            .is_err());
    }
}
