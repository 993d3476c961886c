//! Fault-injecting in-memory transport for tests and demos.
//!
//! A serial device link does not lose or reorder bytes, but it can damage
//! them.  [`pipe`] returns two connected [`DuplexStream`] ends with a relay
//! task per direction in between.  Each relay parses frames and, according
//! to its [`SimulatorConfig`], flips a byte in the payload of selected
//! command frames and/or delays every frame:
//!
//! | Fault       | Description                                            |
//! |-------------|--------------------------------------------------------|
//! | Corruption  | XOR one payload byte of a checksummed frame with 0xFF. |
//! | Latency     | Sleep `latency` before forwarding each frame.          |
//!
//! Control frames travel untouched.  Random corruption uses a seeded
//! [`StdRng`] so failing runs can be replayed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use crate::packet::{self, integrity, HEADER_LEN};

const PIPE_BUFFER: usize = 64 * 1024;

/// Which command frames to damage.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FaultPlan {
    #[default]
    Never,
    /// Zero-based indices of command frames, counted per direction.
    Frames(Vec<usize>),
    /// Damage each command frame with probability `rate` (0.0 to 1.0).
    Random { rate: f64, seed: u64 },
}

/// Configuration for one direction of the simulated link.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    pub corruption: FaultPlan,
    /// Fixed delay applied to every frame.
    pub latency: Duration,
}

impl SimulatorConfig {
    /// Damage exactly the listed command frames.
    pub fn corrupt_frames(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            corruption: FaultPlan::Frames(indices.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Counters for one direction.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub frames: AtomicUsize,
    pub corrupted: AtomicUsize,
}

impl RelayStats {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn corrupted(&self) -> usize {
        self.corrupted.load(Ordering::SeqCst)
    }
}

/// Both ends of a simulated link plus per-direction statistics.
#[derive(Debug)]
pub struct SimulatedPipe {
    pub a: DuplexStream,
    pub b: DuplexStream,
    /// Frames travelling from `a` to `b`.
    pub a_to_b: Arc<RelayStats>,
    /// Frames travelling from `b` to `a`.
    pub b_to_a: Arc<RelayStats>,
}

/// Build a simulated link.  Must be called inside a tokio runtime.
pub fn pipe(a_to_b: SimulatorConfig, b_to_a: SimulatorConfig) -> SimulatedPipe {
    let (a, a_relay) = tokio::io::duplex(PIPE_BUFFER);
    let (b, b_relay) = tokio::io::duplex(PIPE_BUFFER);
    let (a_rd, a_wr) = tokio::io::split(a_relay);
    let (b_rd, b_wr) = tokio::io::split(b_relay);

    let forward = Arc::new(RelayStats::default());
    let backward = Arc::new(RelayStats::default());
    tokio::spawn(relay(a_rd, b_wr, a_to_b, Arc::clone(&forward)));
    tokio::spawn(relay(b_rd, a_wr, b_to_a, Arc::clone(&backward)));

    SimulatedPipe {
        a,
        b,
        a_to_b: forward,
        b_to_a: backward,
    }
}

struct Injector {
    plan: FaultPlan,
    rng: Option<StdRng>,
    command_frames: usize,
}

impl Injector {
    fn new(plan: FaultPlan) -> Self {
        let rng = match plan {
            FaultPlan::Random { seed, .. } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };
        Self {
            plan,
            rng,
            command_frames: 0,
        }
    }

    /// Possibly damage `payload`.  Returns `true` if a byte was flipped.
    fn apply(&mut self, payload: &mut [u8]) -> bool {
        let index = self.command_frames;
        self.command_frames += 1;

        let hit = match &self.plan {
            FaultPlan::Never => false,
            FaultPlan::Frames(targets) => targets.contains(&index),
            FaultPlan::Random { rate, .. } => {
                self.rng.as_mut().is_some_and(|rng| rng.gen_bool(*rate))
            }
        };
        if !hit {
            return false;
        }
        let position = match self.rng.as_mut() {
            Some(rng) => rng.gen_range(0..payload.len()),
            None => payload.len() - 1,
        };
        payload[position] ^= 0xFF;
        true
    }
}

async fn relay(
    mut rd: ReadHalf<DuplexStream>,
    mut wr: WriteHalf<DuplexStream>,
    config: SimulatorConfig,
    stats: Arc<RelayStats>,
) {
    let mut injector = Injector::new(config.corruption);
    let mut header = [0u8; HEADER_LEN];

    loop {
        if rd.read_exact(&mut header).await.is_err() {
            break;
        }
        let mut payload = vec![0u8; packet::declared_len(&header[..])];
        if rd.read_exact(&mut payload).await.is_err() {
            break;
        }

        if header[2] == integrity::INTERNET && !payload.is_empty() && injector.apply(&mut payload) {
            stats.corrupted.fetch_add(1, Ordering::SeqCst);
            log::debug!("[sim] corrupted frame id={}", packet::raw_packet_id(&header[..]));
        }
        stats.frames.fetch_add(1, Ordering::SeqCst);

        if !config.latency.is_zero() {
            tokio::time::sleep(config.latency).await;
        }
        if wr.write_all(&header).await.is_err()
            || wr.write_all(&payload).await.is_err()
            || wr.flush().await.is_err()
        {
            break;
        }
    }
    // Propagate end-of-stream to the far side.
    let _ = wr.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_plan_hits_only_listed_indices() {
        let mut injector = Injector::new(FaultPlan::Frames(vec![1]));
        let mut p = vec![1, 2, 3];
        assert!(!injector.apply(&mut p));
        assert!(injector.apply(&mut p));
        assert_eq!(p, vec![1, 2, 3 ^ 0xFF]);
        assert!(!injector.apply(&mut p));
    }

    #[test]
    fn random_plan_is_reproducible() {
        let run = || {
            let mut injector = Injector::new(FaultPlan::Random { rate: 0.5, seed: 7 });
            (0..32)
                .map(|_| injector.apply(&mut [0u8; 4]))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn never_plan_is_transparent() {
        let mut injector = Injector::new(FaultPlan::Never);
        let mut p = vec![9; 8];
        for _ in 0..10 {
            assert!(!injector.apply(&mut p));
        }
        assert_eq!(p, vec![9; 8]);
    }
}
