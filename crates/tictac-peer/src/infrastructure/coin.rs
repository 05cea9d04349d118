//! Starting-mark coins.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use tictac_core::Mark;

use crate::application::ports::CoinFlip;

/// Fair coin backed by the thread-local `rand` generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCoin;

impl CoinFlip for RandomCoin {
    fn starting_mark(&self) -> Mark {
        if rand::rng().random_bool(0.5) {
            Mark::X
        } else {
            Mark::O
        }
    }
}

/// Deterministic coin that cycles through a fixed sequence of marks.
///
/// Also counts flips, so tests can assert how many decisions were made.
#[derive(Debug)]
pub struct ScriptedCoin {
    marks: Vec<Mark>,
    flips: AtomicUsize,
}

impl ScriptedCoin {
    /// An empty `marks` behaves like a coin that always lands on `X`.
    pub fn new(marks: Vec<Mark>) -> Self {
        Self {
            marks,
            flips: AtomicUsize::new(0),
        }
    }

    pub fn flips(&self) -> usize {
        self.flips.load(Ordering::SeqCst)
    }
}

impl CoinFlip for ScriptedCoin {
    fn starting_mark(&self) -> Mark {
        let n = self.flips.fetch_add(1, Ordering::SeqCst);
        if self.marks.is_empty() {
            return Mark::X;
        }
        self.marks[n % self.marks.len()]
    }
}
