//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, duplicate, and corrupt packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides a [`Simulator`] that hands out pairs of connected
//! [`SimSocket`]s and intercepts every send, applying a configurable fault
//! model:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a packet with probability `loss_rate`.      |
//! | Corruption       | Flip one random bit with probability `corrupt_rate`. |
//! | Duplication      | Deliver a packet twice with probability `duplicate_rate`. |
//!
//! Faults are drawn from a seeded RNG so failures are reproducible, and can
//! be changed while a link is in use (e.g. lossless handshake, lossy
//! transfer, lossless teardown).

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::Datagram;

/// Probabilities of each fault, all in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Faults {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered packet has one bit flipped.
    pub corrupt_rate: f64,
    /// Probability that a delivered packet is delivered twice.
    pub duplicate_rate: f64,
}

impl Faults {
    /// A lossy link that drops `rate` of all packets and nothing else.
    pub fn lossy(rate: f64) -> Self {
        Self {
            loss_rate: rate,
            ..Self::default()
        }
    }
}

/// Configuration for the fault-injection model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    pub faults: Faults,
    /// Seed for the fault RNG.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            faults: Faults::default(),
            seed: 0x5eed,
        }
    }
}

/// Counters describing what the simulated network did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub delivered: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    corrupted: AtomicU64,
    duplicated: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    faults: Mutex<Faults>,
    rng: Mutex<StdRng>,
    counters: Counters,
}

/// What the fault model decided for one outbound datagram.
enum Fate {
    Drop,
    Deliver { copies: usize, flip_bit: Option<usize> },
}

impl Shared {
    fn decide(&self, len: usize) -> Fate {
        let faults = *self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        if rng.random_bool(faults.loss_rate.clamp(0.0, 1.0)) {
            return Fate::Drop;
        }
        let flip_bit = (len > 0 && rng.random_bool(faults.corrupt_rate.clamp(0.0, 1.0)))
            .then(|| rng.random_range(0..len * 8));
        let copies = if rng.random_bool(faults.duplicate_rate.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        Fate::Deliver { copies, flip_bit }
    }
}

/// A fault-injecting network joining pairs of [`SimSocket`]s.
///
/// Cloning a `Simulator` yields another handle to the same fault model.
#[derive(Debug, Clone)]
pub struct Simulator {
    shared: Arc<Shared>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                faults: Mutex::new(config.faults),
                rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
                counters: Counters::default(),
            }),
        }
    }

    /// A pass-through simulator (no faults).
    pub fn lossless() -> Self {
        Self::new(SimulatorConfig::default())
    }

    /// Create two sockets wired to each other.
    ///
    /// The first is addressed `10.0.0.1:4000`, the second `10.0.0.2:5000`.
    pub fn pair(&self) -> (SimSocket, SimSocket) {
        let a_addr = SocketAddr::from(([10, 0, 0, 1], 4000));
        let b_addr = SocketAddr::from(([10, 0, 0, 2], 5000));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = SimSocket {
            addr: a_addr,
            peer: b_addr,
            to_peer: b_tx,
            inbox: tokio::sync::Mutex::new(a_rx),
            shared: Arc::clone(&self.shared),
        };
        let b = SimSocket {
            addr: b_addr,
            peer: a_addr,
            to_peer: a_tx,
            inbox: tokio::sync::Mutex::new(b_rx),
            shared: Arc::clone(&self.shared),
        };
        (a, b)
    }

    /// Replace the fault model; applies to every datagram sent from now on.
    pub fn set_faults(&self, faults: Faults) {
        *self.shared.faults.lock().unwrap_or_else(|e| e.into_inner()) = faults;
    }

    pub fn stats(&self) -> SimStats {
        let c = &self.shared.counters;
        SimStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            corrupted: c.corrupted.load(Ordering::Relaxed),
            duplicated: c.duplicated.load(Ordering::Relaxed),
        }
    }
}

type Datagrams = mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>;

/// One end of a simulated link.
#[derive(Debug)]
pub struct SimSocket {
    addr: SocketAddr,
    peer: SocketAddr,
    to_peer: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbox: tokio::sync::Mutex<Datagrams>,
    shared: Arc<Shared>,
}

impl SimSocket {
    /// Address of the other end of the link.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn transmit(&self, buf: &[u8], dest: SocketAddr) {
        if dest != self.peer {
            log::debug!("[sim] {} → {dest}: no such host, dropped", self.addr);
            return;
        }
        let counters = &self.shared.counters;
        match self.shared.decide(buf.len()) {
            Fate::Drop => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("[sim] {} → {dest}: {} bytes lost", self.addr, buf.len());
            }
            Fate::Deliver { copies, flip_bit } => {
                let mut data = buf.to_vec();
                if let Some(bit) = flip_bit {
                    data[bit / 8] ^= 1 << (bit % 8);
                    counters.corrupted.fetch_add(1, Ordering::Relaxed);
                }
                if copies > 1 {
                    counters.duplicated.fetch_add(1, Ordering::Relaxed);
                }
                for _ in 0..copies {
                    // A closed peer behaves like an unreachable host.
                    if self.to_peer.send((data.clone(), self.addr)).is_ok() {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

impl Datagram for SimSocket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.transmit(buf, dest);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "simulated peer released its socket",
            )),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lossless_pair_delivers_in_order() {
        let sim = Simulator::lossless();
        let (a, b) = sim.pair();

        a.send_to(b"one", b.local_addr().unwrap()).await.unwrap();
        a.send_to(b"two", b.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"one");
        assert_eq!(from, a.local_addr().unwrap());
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"two");
        assert_eq!(sim.stats().delivered, 2);
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let sim = Simulator::new(SimulatorConfig {
            faults: Faults::lossy(1.0),
            ..SimulatorConfig::default()
        });
        let (a, b) = sim.pair();
        for _ in 0..10 {
            a.send_to(b"gone", b.local_addr().unwrap()).await.unwrap();
        }
        let stats = sim.stats();
        assert_eq!(stats.dropped, 10);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn corruption_flips_exactly_one_bit() {
        let sim = Simulator::new(SimulatorConfig {
            faults: Faults {
                corrupt_rate: 1.0,
                ..Faults::default()
            },
            ..SimulatorConfig::default()
        });
        let (a, b) = sim.pair();
        let original = [0u8; 32];
        a.send_to(&original, b.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 32];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        let flipped: u32 = buf[..n].iter().map(|b| b.count_ones()).sum();
        assert_eq!(flipped, 1);
    }

    #[tokio::test]
    async fn faults_can_be_changed_at_runtime() {
        let sim = Simulator::new(SimulatorConfig {
            faults: Faults::lossy(1.0),
            ..SimulatorConfig::default()
        });
        let (a, b) = sim.pair();
        a.send_to(b"lost", b.local_addr().unwrap()).await.unwrap();
        sim.set_faults(Faults::default());
        a.send_to(b"kept", b.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 8];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"kept");
    }

    #[tokio::test]
    async fn dropped_peer_surfaces_as_error() {
        let sim = Simulator::lossless();
        let (a, b) = sim.pair();
        drop(b);
        let mut buf = [0u8; 8];
        assert!(a.recv_from(&mut buf).await.is_err());
    }
}
