//! Send/Receive/Reply primitives (§4.1).
//!
//! The kernel contract assumes four blocking primitives. This rendition
//! keeps the same call/response shape but swaps the syscalls for a thread
//! plus an `mpsc` channel: `Mailbox::call` is `Send`, `ServerEndpoint::receive`
//! is `Receive`, and dropping (or invoking) a [`ReplyToken`] is `Reply`. Every
//! server in this workspace is still a single-threaded loop built from these
//! two types — no cooperative async runtime is introduced.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use marklin_common::ids::TaskId;

/// One in-flight request, holding the means to reply exactly once.
pub struct Call<Req, Rep> {
    /// Identifier of the task that sent this request.
    pub from: TaskId,
    /// The request payload.
    pub request: Req,
    reply_tx: mpsc::SyncSender<Rep>,
}

impl<Req, Rep> Call<Req, Rep> {
    /// Reply to the sender. Non-blocking from the server's point of view:
    /// the sender is already parked in `Mailbox::call`'s `recv`.
    pub fn reply(self, rep: Rep) {
        // The sender may have given up (e.g. the calling thread panicked);
        // a dropped receiver is not this server's problem.
        let _ = self.reply_tx.send(rep);
    }

    /// Split into `(from, request, reply_token)` when a handler needs to
    /// hold the reply token past point of receipt (e.g. the clock service's
    /// deferred `Delay` replies).
    pub fn into_parts(self) -> (TaskId, Req, ReplyToken<Rep>) {
        (self.from, self.request, ReplyToken { reply_tx: self.reply_tx })
    }
}

/// A reply capability detached from its originating [`Call`], so it can be
/// stashed (e.g. in the clock service's wait-list) and fired later.
pub struct ReplyToken<Rep> {
    reply_tx: mpsc::SyncSender<Rep>,
}

impl<Rep> ReplyToken<Rep> {
    /// Fire the deferred reply.
    pub fn reply(self, rep: Rep) {
        let _ = self.reply_tx.send(rep);
    }
}

/// The server side of a channel: `Receive` / `ReceiveNonBlock` / `AwaitEvent`
/// all reduce to one of this type's three receive methods.
pub struct ServerEndpoint<Req, Rep> {
    rx: mpsc::Receiver<Call<Req, Rep>>,
}

impl<Req, Rep> ServerEndpoint<Req, Rep> {
    /// Block until a request arrives (`Receive`).
    pub fn receive(&self) -> Call<Req, Rep> {
        // The mailbox side is never dropped while the server runs; a
        // disconnected channel here means the workspace is shutting down.
        self.rx.recv().expect("mailbox sender dropped while server is running")
    }

    /// Block until a request arrives or `timeout` elapses, whichever comes
    /// first. A server's periodic housekeeping (clock tick, sensor poll)
    /// is driven by the `None` case, which stands in for `AwaitEvent`.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<Call<Req, Rep>> {
        match self.rx.recv_timeout(timeout) {
            Ok(call) => Some(call),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                panic!("mailbox sender dropped while server is running")
            }
        }
    }

    /// Return immediately with `None` if no request is queued (`ReceiveNonBlock`).
    pub fn try_receive(&self) -> Option<Call<Req, Rep>> {
        match self.rx.try_recv() {
            Ok(call) => Some(call),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                panic!("mailbox sender dropped while server is running")
            }
        }
    }
}

/// The client side of a channel: `Send(tid, req) -> rep`, blocking until
/// the server replies.
#[derive(Clone)]
pub struct Mailbox<Req, Rep> {
    tx: mpsc::Sender<Call<Req, Rep>>,
}

impl<Req, Rep> Mailbox<Req, Rep> {
    /// Send a request and block until the server replies.
    ///
    /// Panics if the server has gone away; every server in this workspace
    /// runs for the lifetime of the process, so a disconnected mailbox
    /// indicates a programming error, not a recoverable condition.
    pub fn call(&self, from: TaskId, request: Req) -> Rep {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Call { from, request, reply_tx })
            .expect("server mailbox closed");
        reply_rx.recv().expect("server dropped the reply token without replying")
    }
}

/// Create a fresh request/reply channel: the client-facing [`Mailbox`] and
/// the server-facing [`ServerEndpoint`].
pub fn channel<Req, Rep>() -> (Mailbox<Req, Rep>, ServerEndpoint<Req, Rep>) {
    let (tx, rx) = mpsc::channel();
    (Mailbox { tx }, ServerEndpoint { rx })
}
