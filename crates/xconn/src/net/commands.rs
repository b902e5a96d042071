// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Commands and events crossing the boundary between caller threads and the
//! [`EventLoop`](super::EventLoop) thread.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::Waker;

use crate::ring::Ring;

/// Commands accepted by the event loop from any other thread.
#[derive(Debug)]
pub enum LoopCommand {
    /// Bind and register a listener. `reply_token` is echoed back on
    /// [`LoopEvent::Listening`] so the caller can correlate the bind.
    Listen { addr: SocketAddr, reply_token: usize },
    /// Open an outbound connection.
    Connect { addr: SocketAddr, reply_token: usize },
    /// Close a connection by its event-loop token.
    Close { token: usize },
    /// Re-check a connection's writability (used to wake the loop after a
    /// producer commits to a ring the loop isn't otherwise watching).
    Flush { token: usize },
    Shutdown,
}

/// Events emitted by the event loop.
#[derive(Debug)]
pub enum LoopEvent {
    Started,
    Stopped,
    Listening { reply_token: usize, local_addr: SocketAddr },
    /// A new inbound connection. `ring` is the outbound ring's handle:
    /// session/application code claims, writes, and commits into it
    /// directly from whatever thread it runs on; only the I/O thread ever
    /// drains it to the socket.
    Accepted { token: usize, local_port: u16, remote_addr: SocketAddr, ring: Arc<Ring> },
    ConnectionEstablished { reply_token: usize, token: usize, remote_addr: SocketAddr, ring: Arc<Ring> },
    Closed { token: usize, reason: Option<String> },
    DataReceived { token: usize, bytes: Vec<u8> },
    Error { token: Option<usize>, error: String },
}

/// Handle used by other threads to drive the event loop.
pub struct EventLoopHandle {
    cmd_tx: Sender<LoopCommand>,
    event_rx: Receiver<LoopEvent>,
    waker: Arc<Waker>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    next_reply_token: usize,
}

impl EventLoopHandle {
    pub(super) fn new(
        cmd_tx: Sender<LoopCommand>,
        event_rx: Receiver<LoopEvent>,
        waker: Arc<Waker>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cmd_tx,
            event_rx,
            waker,
            thread_handle: None,
            running,
            next_reply_token: 0,
        }
    }

    pub(super) fn set_thread(&mut self, handle: JoinHandle<()>) {
        self.thread_handle = Some(handle);
    }

    fn send(&self, cmd: LoopCommand) -> io::Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "event loop stopped"))?;
        self.waker.wake()
    }

    /// Request a listener bind; returns the `reply_token` that will appear
    /// on the resulting [`LoopEvent::Listening`] or [`LoopEvent::Error`].
    pub fn listen(&mut self, addr: SocketAddr) -> io::Result<usize> {
        let token = self.next_reply_token;
        self.next_reply_token += 1;
        self.send(LoopCommand::Listen { addr, reply_token: token })?;
        Ok(token)
    }

    pub fn connect(&mut self, addr: SocketAddr) -> io::Result<usize> {
        let token = self.next_reply_token;
        self.next_reply_token += 1;
        self.send(LoopCommand::Connect { addr, reply_token: token })?;
        Ok(token)
    }

    pub fn close(&self, token: usize) -> io::Result<()> {
        self.send(LoopCommand::Close { token })
    }

    /// Wake the loop to re-check a channel's ring/overflow after a producer
    /// commits data, rather than waiting for the next poll timeout.
    pub fn notify_flush(&self, token: usize) -> io::Result<()> {
        self.send(LoopCommand::Flush { token })
    }

    pub fn try_recv(&self) -> Option<LoopEvent> {
        match self.event_rx.try_recv() {
            Ok(e) => Some(e),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(LoopEvent::Stopped),
        }
    }

    pub fn recv(&self) -> Option<LoopEvent> {
        self.event_rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<LoopEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let _ = self.cmd_tx.send(LoopCommand::Shutdown);
        let _ = self.waker.wake();
        if let Some(h) = self.thread_handle.take() {
            h.join().map_err(|_| io::Error::other("event loop thread panicked"))?;
        }
        Ok(())
    }

    /// Shut down without joining a thread (for loops never spawned via
    /// [`EventLoop::spawn`](super::EventLoop::spawn), e.g. in tests).
    pub fn shutdown_local(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.cmd_tx.send(LoopCommand::Shutdown);
        let _ = self.waker.wake();
    }
}

impl Drop for EventLoopHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::EventLoop;
    use crate::net::RunMode;

    #[test]
    fn reply_tokens_increment_per_call() {
        let (_loop, mut handle) = EventLoop::new(RunMode::default(), 4096).unwrap();
        let a = handle.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = handle.connect("127.0.0.1:1".parse().unwrap()).unwrap();
        assert_ne!(a, b);
        handle.shutdown_local();
    }
}
