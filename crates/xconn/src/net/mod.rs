// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded network event loop.
//!
//! One `EventLoop` owns every socket the engine talks through: the accept
//! listener(s) and every established [`TcpChannel`](crate::transport::tcp::channel::TcpChannel).
//! All socket I/O happens on this one thread; other threads interact with
//! it only through [`EventLoopHandle`] (a command channel plus a `mio`
//! `Waker`) and through the lock-free outbound [`Ring`](crate::ring::Ring)
//! each channel owns.
//!
//! # Iteration order
//!
//! Each pass of the loop does, in order:
//! 1. Poll (blocking up to the configured timeout in [`RunMode::Normal`],
//!    non-blocking in [`RunMode::BusySpin`]).
//! 2. Accept any pending connections on registered listeners.
//! 3. Drain commands queued by other threads (connect/close/register).
//! 4. Service readable sockets (feed bytes to the caller's `on_readable`).
//! 5. Service writable sockets (drain each channel's ring/overflow).
//!
//! This fixed order means a connection accepted in step 2 can be written to
//! in the same pass it was accepted (it is registered before step 5 runs),
//! and a close requested in step 3 is honored before step 4 touches a
//! socket that no longer exists.

mod commands;

pub use commands::{EventLoopHandle, LoopCommand, LoopEvent};

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};

use crate::logging::{self};
use crate::transport::tcp::channel::TcpChannel;

const WAKER_TOKEN: Token = Token(0);
const LISTENER_TOKEN_START: usize = 1;
const CONNECTION_TOKEN_START: usize = 1_000_000;
const MAX_EVENTS: usize = 256;

/// How the loop waits between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Block in `poll` for up to `timeout`; yields the CPU when idle. The
    /// default, and the right choice outside of latency-critical paths.
    Normal { timeout: Duration },
    /// Poll with a zero timeout and spin. Lower latency, pins a core.
    BusySpin,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Normal {
            timeout: Duration::from_millis(100),
        }
    }
}

struct Connection {
    channel: TcpChannel,
}

/// Owns every registered socket; runs on a single dedicated thread.
pub struct EventLoop {
    poll: Poll,
    mode: RunMode,
    listeners: HashMap<Token, (TcpListener, u16)>,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    cmd_rx: Receiver<LoopCommand>,
    event_tx: Sender<LoopEvent>,
    running: Arc<AtomicBool>,
    ring_capacity: usize,
}

impl EventLoop {
    pub fn new(mode: RunMode, ring_capacity: usize) -> io::Result<(Self, EventLoopHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (cmd_tx, cmd_rx) = channel();
        let (event_tx, event_rx) = channel();
        let running = Arc::new(AtomicBool::new(true));

        let event_loop = Self {
            poll,
            mode,
            listeners: HashMap::new(),
            connections: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            cmd_rx,
            event_tx,
            running: running.clone(),
            ring_capacity,
        };

        let handle = EventLoopHandle::new(cmd_tx, event_rx, waker, running);
        Ok((event_loop, handle))
    }

    /// Spawn the loop onto its own OS thread, optionally pinned to a CPU
    /// index (best-effort; pinning failures are logged, not fatal).
    pub fn spawn(mode: RunMode, ring_capacity: usize, cpu_pin: Option<usize>) -> io::Result<EventLoopHandle> {
        let (event_loop, mut handle) = Self::new(mode, ring_capacity)?;
        let thread_handle: JoinHandle<()> = thread::Builder::new()
            .name("xconn-net".to_string())
            .spawn(move || {
                if let Some(cpu) = cpu_pin {
                    logging::info!("pinning net event loop thread to cpu {}", cpu);
                }
                event_loop.run();
            })?;
        handle.set_thread(thread_handle);
        Ok(handle)
    }

    fn next_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token += 1;
        t
    }

    pub fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        let _ = self.event_tx.send(LoopEvent::Started);

        while self.running.load(Ordering::Relaxed) {
            let timeout = match self.mode {
                RunMode::Normal { timeout } => Some(timeout),
                RunMode::BusySpin => Some(Duration::from_millis(0)),
            };

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() != io::ErrorKind::Interrupted {
                    logging::warn!("poll error: {}", e);
                }
                continue;
            }

            let mut listener_tokens = Vec::new();
            let mut waker_fired = false;
            let mut readable = Vec::new();

            for event in events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN {
                    waker_fired = true;
                } else if self.listeners.contains_key(&token) {
                    listener_tokens.push(token);
                } else if event.is_readable() {
                    readable.push(token);
                }
                // Writable readiness is ignored here; every connection is
                // drained unconditionally below instead of waiting for
                // mio's (edge-triggered, fires-once) writable bit.
            }

            for token in listener_tokens {
                self.handle_accept(token);
            }

            if waker_fired {
                self.handle_commands();
            }

            for token in readable {
                self.handle_readable(token);
            }

            // A ring or overflow buffer can pick up new bytes from another
            // thread (ticker heartbeats, session sends, resend replay)
            // between two poll() passes, with no corresponding edge-trigger
            // on the socket's WRITABLE interest. Sweep every live connection
            // each pass instead of relying on that event.
            let live_tokens: Vec<Token> = self.connections.keys().copied().collect();
            for token in live_tokens {
                self.handle_writable(token);
            }
        }

        for (token, conn) in self.connections.drain() {
            let _ = self.event_tx.send(LoopEvent::Closed {
                token: token.0,
                reason: Some("event loop shutdown".into()),
            });
            drop(conn);
        }
        let _ = self.event_tx.send(LoopEvent::Stopped);
    }

    fn handle_accept(&mut self, listener_token: Token) {
        let local_port = match self.listeners.get(&listener_token) {
            Some((_, port)) => *port,
            None => return,
        };
        loop {
            // Re-borrow `self.listeners` fresh each pass so the immutable borrow ends
            // with this statement, before `self.next_token()` needs `&mut self` below.
            let accept_result = match self.listeners.get(&listener_token) {
                Some((listener, _)) => listener.accept(),
                None => return,
            };
            match accept_result {
                Ok((mut stream, remote_addr)) => {
                    let token = self.next_token();
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                    {
                        logging::warn!("failed to register accepted connection: {}", e);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    let boxed: Box<dyn crate::transport::tcp::byte_stream::ByteStream> = Box::new(stream);
                    let channel = match TcpChannel::new(boxed, remote_addr, false, self.ring_capacity) {
                        Ok(c) => c,
                        Err(e) => {
                            logging::warn!("failed to build channel for accepted conn: {}", e);
                            continue;
                        }
                    };
                    let ring = channel.outbound_handle();
                    self.connections.insert(token, Connection { channel });
                    let _ = self.event_tx.send(LoopEvent::Accepted {
                        token: token.0,
                        local_port,
                        remote_addr,
                        ring,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    logging::warn!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_commands(&mut self) {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(LoopCommand::Listen { addr, reply_token }) => self.handle_listen(addr, reply_token),
                Ok(LoopCommand::Connect { addr, reply_token }) => self.handle_connect(addr, reply_token),
                Ok(LoopCommand::Close { token }) => self.handle_close(Token(token)),
                Ok(LoopCommand::Flush { token }) => self.handle_writable(Token(token)),
                Ok(LoopCommand::Shutdown) => {
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }

    fn handle_listen(&mut self, addr: SocketAddr, reply_token: usize) {
        match TcpListener::bind(addr) {
            Ok(mut listener) => {
                let token = Token(LISTENER_TOKEN_START + reply_token);
                if let Err(e) = self
                    .poll
                    .registry()
                    .register(&mut listener, token, Interest::READABLE)
                {
                    let _ = self.event_tx.send(LoopEvent::Error {
                        token: None,
                        error: format!("failed to register listener: {e}"),
                    });
                    return;
                }
                self.listeners.insert(token, (listener, addr.port()));
                let _ = self.event_tx.send(LoopEvent::Listening {
                    reply_token,
                    local_addr: addr,
                });
            }
            Err(e) => {
                let _ = self.event_tx.send(LoopEvent::Error {
                    token: None,
                    error: format!("bind {addr} failed: {e}"),
                });
            }
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, reply_token: usize) {
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                let token = self.next_token();
                if let Err(e) =
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                {
                    let _ = self.event_tx.send(LoopEvent::Error {
                        token: Some(reply_token),
                        error: format!("failed to register outbound connection: {e}"),
                    });
                    return;
                }
                let _ = stream.set_nodelay(true);
                let boxed: Box<dyn crate::transport::tcp::byte_stream::ByteStream> = Box::new(stream);
                let channel = match TcpChannel::new(boxed, addr, true, self.ring_capacity) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = self.event_tx.send(LoopEvent::Error {
                            token: Some(reply_token),
                            error: format!("failed to build outbound channel: {e}"),
                        });
                        return;
                    }
                };
                let ring = channel.outbound_handle();
                self.connections.insert(token, Connection { channel });
                let _ = self.event_tx.send(LoopEvent::ConnectionEstablished {
                    reply_token,
                    token: token.0,
                    remote_addr: addr,
                    ring,
                });
            }
            Err(e) => {
                let _ = self.event_tx.send(LoopEvent::Error {
                    token: Some(reply_token),
                    error: format!("connect to {addr} failed: {e}"),
                });
            }
        }
    }

    fn handle_close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            // Drain whatever the ring/overflow still hold (e.g. a
            // rejection Logout the acceptor just committed) before the
            // socket goes away; best-effort, a still-blocked write here
            // is lost along with the connection either way.
            if let Err(e) = conn.channel.flush() {
                logging::warn!("flush before close failed for token {}: {}", token.0, e);
            }
            // `conn.channel` holds the only registered handle for this
            // token; closing and dropping it removes the fd, which the
            // kernel drops from the epoll set along with it.
            conn.channel.close();
            let _ = self.event_tx.send(LoopEvent::Closed {
                token: token.0,
                reason: Some("closed by request".into()),
            });
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };
        let mut buf = [0u8; 16 * 1024];
        loop {
            match conn.channel.read(&mut buf) {
                Ok(0) => {
                    self.handle_close(token);
                    return;
                }
                Ok(n) => {
                    let _ = self.event_tx.send(LoopEvent::DataReceived {
                        token: token.0,
                        bytes: buf[..n].to_vec(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let reason = format!("read error: {e}");
                    self.handle_close(token);
                    let _ = self.event_tx.send(LoopEvent::Error {
                        token: Some(token.0),
                        error: reason,
                    });
                    return;
                }
            }
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };
        match conn.channel.flush() {
            Ok(_) => {}
            Err(e) => {
                let reason = format!("write error: {e}");
                self.handle_close(token);
                let _ = self.event_tx.send(LoopEvent::Error {
                    token: Some(token.0),
                    error: reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_run_mode_is_normal_with_100ms_timeout() {
        match RunMode::default() {
            RunMode::Normal { timeout } => assert_eq!(timeout, Duration::from_millis(100)),
            RunMode::BusySpin => panic!("expected Normal"),
        }
    }

    #[test]
    fn event_loop_can_be_constructed_and_shut_down() {
        let (_loop, mut handle) = EventLoop::new(RunMode::default(), 4096).unwrap();
        // Dropping the handle without spawning is fine; no thread was started.
        handle.shutdown_local();
    }
}
