//! Owns the UDP socket and the bounded pool of receive buffers, and
//! shuttles datagrams between the network and the [`engine`] across the
//! socket and processing domains.
//!
//! The socket domain holds exclusive right to call socket operations:
//! `recv_from` (in the receive loop below), `send_to` (posted as a job per
//! [`Pipeline::receive_one`]'s dispatch), and the buffer-pool bookkeeping
//! around both. Sends are posted to `socket_strand` via [`Strand::post_async`]
//! rather than spawned as detached tasks, so sends to a single destination
//! are issued to the kernel in the order their originating datagrams
//! finished processing, never racing each other.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::directory::ProcessingState;
use crate::engine::{self, Mode};
use crate::strand::Strand;

/// Size of every receive buffer. Chosen to comfortably hold a maximum-size
/// UDP datagram with room to spare.
pub const BUF_SIZE: usize = 65536;

type Slot = Box<[u8; BUF_SIZE]>;

fn new_slot() -> Slot {
    Box::new([0u8; BUF_SIZE])
}

/// State exclusive to the socket domain: the idle buffer queue and the
/// running count of allocated (idle + in-flight) buffers.
pub struct SocketState {
    idle: VecDeque<Slot>,
    allocated: usize,
    max_process_q: usize,
}

impl SocketState {
    fn new(max_process_q: usize) -> Self {
        SocketState { idle: VecDeque::new(), allocated: 0, max_process_q }
    }

    /// Pops an idle buffer, or allocates a fresh one if under cap. Returns
    /// `None` if at cap with nothing idle — the caller should wait for
    /// socket writability and retry.
    fn try_acquire(&mut self) -> Option<Slot> {
        if let Some(slot) = self.idle.pop_front() {
            return Some(slot);
        }
        if self.allocated < self.max_process_q {
            self.allocated += 1;
            return Some(new_slot());
        }
        None
    }

    fn release(&mut self, slot: Slot) {
        self.idle.push_back(slot);
    }
}

/// A received datagram, ref-counted so a single buffer can back several
/// in-flight sends. The backing storage returns to the idle queue, on the
/// socket domain, once the last reference drops.
pub struct RecvBuffer {
    data: Option<Slot>,
    len: usize,
    socket_strand: Strand<SocketState>,
}

impl RecvBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data.as_ref().expect("buffer taken only on drop")[..self.len]
    }
}

impl Drop for RecvBuffer {
    fn drop(&mut self) {
        if let Some(slot) = self.data.take() {
            self.socket_strand.post(move |state: &mut SocketState| state.release(slot));
        }
    }
}

async fn acquire(socket: &UdpSocket, strand: &Strand<SocketState>) -> Slot {
    loop {
        let (tx, rx) = tokio::sync::oneshot::channel();
        strand.post(move |state: &mut SocketState| {
            let _ = tx.send(state.try_acquire());
        });
        match rx.await {
            Ok(Some(slot)) => return slot,
            _ => {
                // At cap: socket writability is a cheap, already-available
                // wake-up source to retry on, not a promise that send will
                // succeed.
                let _ = socket.writable().await;
            }
        }
    }
}

pub struct Pipeline {
    socket: Arc<UdpSocket>,
    socket_strand: Strand<SocketState>,
    processing: Strand<ProcessingState>,
    mode: Mode,
}

impl Pipeline {
    /// Binds the local socket, applies `SO_RCVBUF` (a warning, not a fatal
    /// error, on failure), and wires up the socket-domain strand.
    pub async fn bind(local_addr: SocketAddr, so_rcvbuf: usize, max_process_q: usize, processing: Strand<ProcessingState>, mode: Mode) -> io::Result<Self> {
        let domain = if local_addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
        let sock = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
        sock.set_nonblocking(true)?;
        sock.bind(&local_addr.into())?;
        if let Err(e) = sock.set_recv_buffer_size(so_rcvbuf) {
            tracing::warn!(error = %e, requested = so_rcvbuf, "failed to set SO_RCVBUF, continuing with kernel default");
        }
        let socket = Arc::new(UdpSocket::from_std(sock.into())?);
        let socket_strand = Strand::new(move |_handle| SocketState::new(max_process_q));
        Ok(Pipeline { socket, socket_strand, processing, mode })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the receive loop until `shutdown` reports `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        tracing::info!("receive loop stopping");
                        return;
                    }
                }
                result = self.receive_one() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "receive loop iteration failed");
                    }
                }
            }
        }
    }

    async fn receive_one(&self) -> io::Result<()> {
        let mut slot = acquire(&self.socket, &self.socket_strand).await;
        let (len, sender) = self.socket.recv_from(&mut slot[..]).await?;

        let buf = Arc::new(RecvBuffer { data: Some(slot), len, socket_strand: self.socket_strand.clone() });
        let mode = self.mode.clone();
        let socket = self.socket.clone();
        let socket_strand = self.socket_strand.clone();
        self.processing.post(move |state| {
            let targets = engine::dispatch(&mode, state, sender, buf.as_slice());
            for target in targets {
                let buf = buf.clone();
                let socket = socket.clone();
                socket_strand.post_async(move |_state: &mut SocketState| async move {
                    if let Err(e) = socket.send_to(buf.as_slice(), target).await {
                        tracing::warn!(error = %e, target = %target, "send_to failed");
                    }
                });
            }
        });
        Ok(())
    }

    /// Floods `target` with fixed-size datagrams from a small pool of
    /// throwaway client sockets for `duration`, periodically yielding so the
    /// real receive loop (still running concurrently) can keep up, then
    /// reports the total sent.
    pub async fn run_benchmark(target: SocketAddr, duration: Duration, socket_count: usize) -> io::Result<u64> {
        const PAYLOAD_LEN: usize = 512;
        let payload = vec![0xABu8; PAYLOAD_LEN];
        let mut sockets = Vec::with_capacity(socket_count);
        for _ in 0..socket_count {
            let bind_addr: SocketAddr = if target.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
            sockets.push(UdpSocket::bind(bind_addr).await?);
        }

        let deadline = tokio::time::Instant::now() + duration;
        let mut sent: u64 = 0;
        let mut idx = 0usize;
        while tokio::time::Instant::now() < deadline {
            let socket = &sockets[idx % sockets.len()];
            idx += 1;
            match socket.send_to(&payload, target).await {
                Ok(_) => sent += 1,
                Err(e) => tracing::warn!(error = %e, "benchmark send failed"),
            }
            if idx % 64 == 0 {
                tokio::task::yield_now().await;
            }
        }
        tracing::info!(sent, "benchmark complete");
        Ok(sent)
    }
}
