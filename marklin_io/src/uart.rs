//! UART I/O service (§4.3): `Getc`/`TryGetc`/`Putc`/`Putn` over the
//! `Console` and `Marklin` channels, with FIFO-queued blocking clients and
//! RX/TX notifier threads standing in for hardware interrupts.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use heapless::Deque;
use marklin_common::error::{MarklinError, MarklinResult};
use marklin_common::ids::TaskId;
use tracing::warn;

use marklin_runtime::ipc::{channel, Mailbox, ReplyToken, ServerEndpoint};

/// The two physical UART channels (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartChannel {
    /// Terminal console: buffered TX, supports `Putn`.
    Console,
    /// Marklin train controller: direct, unbuffered, byte-paced TX.
    Marklin,
}

/// A backend capable of moving bytes on and off the physical wire. Swapped
/// for a real serial driver in production; tests use [`LoopbackBackend`].
pub trait UartBackend: Send {
    /// Non-blocking poll for a received byte.
    fn poll_rx(&mut self) -> Option<u8>;
    /// Write one byte to the wire. Blocks for as long as the physical
    /// controller needs to accept it (byte-paced on the real hardware).
    fn write_byte(&mut self, byte: u8);
}

/// An in-memory loopback backend: bytes written become bytes read back.
/// Used by tests and by any caller that wants a UART without hardware.
pub struct LoopbackBackend {
    rx: VecDeque<u8>,
}

impl LoopbackBackend {
    /// Construct an empty loopback backend.
    pub fn new() -> Self {
        Self { rx: VecDeque::new() }
    }

    /// Inject bytes as if they had arrived over the wire.
    pub fn inject_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UartBackend for LoopbackBackend {
    fn poll_rx(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.rx.push_back(byte);
    }
}

/// Console TX ring capacity, in bytes (~10 KB per §4.3).
pub const CONSOLE_TX_CAPACITY: usize = 10 * 1024;

enum Request {
    Getc,
    TryGetc,
    Putc(u8),
    /// `Putn` — console only; any other channel returns `InvalidArgument`.
    Putn(heapless::Vec<u8, 256>),
}

enum Reply {
    Byte(u8),
    NoData,
    /// Number of bytes accepted.
    Written(usize),
    Err(MarklinError),
}

/// Client handle to one UART channel's server.
#[derive(Clone)]
pub struct UartHandle {
    mailbox: Mailbox<Request, Reply>,
}

impl UartHandle {
    /// `Getc`: block until a byte is available.
    pub fn getc(&self, me: TaskId) -> u8 {
        match self.mailbox.call(me, Request::Getc) {
            Reply::Byte(b) => b,
            _ => unreachable!("Getc always replies with a byte"),
        }
    }

    /// `TryGetc`: return `None` immediately if no byte is queued.
    pub fn try_getc(&self, me: TaskId) -> Option<u8> {
        match self.mailbox.call(me, Request::TryGetc) {
            Reply::Byte(b) => Some(b),
            Reply::NoData => None,
            _ => unreachable!("TryGetc replies with Byte or NoData"),
        }
    }

    /// `Putc`: write one byte.
    pub fn putc(&self, me: TaskId, byte: u8) -> MarklinResult<()> {
        match self.mailbox.call(me, Request::Putc(byte)) {
            Reply::Written(_) => Ok(()),
            Reply::Err(e) => Err(e),
            _ => unreachable!("Putc replies with Written or Err"),
        }
    }

    /// `Putn`: write a run of bytes (console channel only). Returns the
    /// number of bytes accepted; a length-0 call is a no-op that returns 0.
    pub fn putn(&self, me: TaskId, bytes: &[u8]) -> MarklinResult<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut chunk = heapless::Vec::new();
        for &b in bytes.iter().take(chunk.capacity()) {
            // capacity checked by `take`; push cannot fail.
            let _ = chunk.push(b);
        }
        match self.mailbox.call(me, Request::Putn(chunk)) {
            Reply::Written(n) => Ok(n),
            Reply::Err(e) => Err(e),
            _ => unreachable!("Putn replies with Written or Err"),
        }
    }
}

/// Spawn one UART channel's server loop, plus its RX notifier thread (and,
/// for [`UartChannel::Console`], a TX-drain notifier thread). Returns a
/// client handle.
pub fn spawn(channel_kind: UartChannel, backend: Box<dyn UartBackend>) -> UartHandle {
    let (mailbox, endpoint) = channel();
    let (rx_tx, rx_rx) = std::sync::mpsc::channel::<u8>();

    let backend = std::sync::Arc::new(std::sync::Mutex::new(backend));

    // RX notifier: polls the backend and forwards bytes to the server.
    {
        let backend = backend.clone();
        thread::Builder::new()
            .name(format!("{:?}_rx_notifier", channel_kind))
            .spawn(move || loop {
                let byte = loop {
                    if let Some(b) = backend.lock().expect("backend mutex poisoned").poll_rx() {
                        break b;
                    }
                    thread::sleep(Duration::from_millis(1));
                };
                if rx_tx.send(byte).is_err() {
                    break;
                }
            })
            .expect("failed to spawn UART RX notifier thread");
    }

    thread::Builder::new()
        .name(format!("{:?}_io_server", channel_kind))
        .spawn(move || run(channel_kind, endpoint, rx_rx, backend))
        .expect("failed to spawn UART io_server thread");

    UartHandle { mailbox }
}

fn run(
    channel_kind: UartChannel,
    endpoint: ServerEndpoint<Request, Reply>,
    rx_rx: std::sync::mpsc::Receiver<u8>,
    backend: std::sync::Arc<std::sync::Mutex<Box<dyn UartBackend>>>,
) {
    let mut rx_buf: VecDeque<u8> = VecDeque::new();
    let mut pending_getc: VecDeque<ReplyToken<Reply>> = VecDeque::new();
    let mut tx_ring: Deque<u8, CONSOLE_TX_CAPACITY> = Deque::new();

    loop {
        // Drain any RX bytes that arrived since the last pass, waking
        // FIFO-queued Getc callers first.
        while let Ok(byte) = rx_rx.try_recv() {
            if let Some(token) = pending_getc.pop_front() {
                token.reply(Reply::Byte(byte));
            } else {
                rx_buf.push_back(byte);
            }
        }

        // Drain the console TX ring: "enable the TX-interrupt mask whenever
        // bytes remain" becomes "write while the ring is non-empty".
        if channel_kind == UartChannel::Console {
            let mut guard = backend.lock().expect("backend mutex poisoned");
            while let Some(byte) = tx_ring.pop_front() {
                guard.write_byte(byte);
            }
        }

        match endpoint.receive_timeout(Duration::from_millis(5)) {
            None => continue,
            Some(call) => {
                let (_from, request, token) = call.into_parts();
                match request {
                    Request::Getc => {
                        if let Some(b) = rx_buf.pop_front() {
                            token.reply(Reply::Byte(b));
                        } else {
                            pending_getc.push_back(token);
                        }
                    }
                    Request::TryGetc => {
                        if let Some(b) = rx_buf.pop_front() {
                            token.reply(Reply::Byte(b));
                        } else {
                            token.reply(Reply::NoData);
                        }
                    }
                    Request::Putc(byte) => {
                        write_one(channel_kind, &backend, &mut tx_ring, byte);
                        token.reply(Reply::Written(1));
                    }
                    Request::Putn(bytes) => {
                        if channel_kind != UartChannel::Console {
                            token.reply(Reply::Err(MarklinError::InvalidArgument));
                            continue;
                        }
                        let mut n = 0;
                        for byte in bytes {
                            if tx_ring.push_back(byte).is_err() {
                                warn!("console TX ring full, dropping remaining Putn bytes");
                                break;
                            }
                            n += 1;
                        }
                        token.reply(Reply::Written(n));
                    }
                }
            }
        }
    }
}

fn write_one(
    channel_kind: UartChannel,
    backend: &std::sync::Arc<std::sync::Mutex<Box<dyn UartBackend>>>,
    tx_ring: &mut Deque<u8, CONSOLE_TX_CAPACITY>,
    byte: u8,
) {
    match channel_kind {
        UartChannel::Marklin => {
            // Direct, unbuffered, byte-paced.
            backend.lock().expect("backend mutex poisoned").write_byte(byte);
        }
        UartChannel::Console => {
            if tx_ring.push_back(byte).is_err() {
                warn!("console TX ring full, dropping byte");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getc_blocks_until_byte_arrives() {
        let mut backend = LoopbackBackend::new();
        backend.inject_rx(b"A");
        let uart = spawn(UartChannel::Marklin, Box::new(backend));
        assert_eq!(uart.getc(TaskId(1)), b'A');
    }

    #[test]
    fn try_getc_returns_none_when_empty() {
        let uart = spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        assert_eq!(uart.try_getc(TaskId(1)), None);
    }

    #[test]
    fn putc_on_marklin_loops_back_through_backend() {
        let uart = spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        uart.putc(TaskId(1), 0x21).unwrap();
        assert_eq!(uart.getc(TaskId(1)), 0x21);
    }

    #[test]
    fn putn_on_marklin_is_rejected() {
        let uart = spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        let err = uart.putn(TaskId(1), &[1, 2, 3]).unwrap_err();
        assert_eq!(err, MarklinError::InvalidArgument);
    }

    #[test]
    fn putn_zero_length_is_a_no_op() {
        let uart = spawn(UartChannel::Console, Box::new(LoopbackBackend::new()));
        assert_eq!(uart.putn(TaskId(1), &[]).unwrap(), 0);
    }

    #[test]
    fn putn_on_console_drains_through_backend() {
        let uart = spawn(UartChannel::Console, Box::new(LoopbackBackend::new()));
        let n = uart.putn(TaskId(1), b"hello").unwrap();
        assert_eq!(n, 5);
        for expected in b"hello" {
            assert_eq!(uart.getc(TaskId(1)), *expected);
        }
    }
}
