//! In-memory line chip for tests.
//!
//! Clones share state, so a test keeps one handle while the controller
//! owns the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{LineChip, LineError, RawEdge};

/// One observed output level transition, in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub line: u32,
    pub high: bool,
}

#[derive(Debug, Default)]
struct MockState {
    outputs: Vec<u32>,
    levels: u64,
    edges: VecDeque<RawEdge>,
    writes: Vec<(u64, u64)>,
    fail_writes: bool,
}

/// Scripted edges in, recorded level writes out.
#[derive(Debug, Clone, Default)]
pub struct MockChip {
    state: Arc<Mutex<MockState>>,
}

impl MockChip {
    /// `outputs` must list the output lines in controller order.
    pub fn new(outputs: &[u32]) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                outputs: outputs.to_vec(),
                ..MockState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an edge for the next `poll_edge`.
    pub fn push_edge(&self, edge: RawEdge) {
        self.lock().edges.push_back(edge);
    }

    pub fn pending_edges(&self) -> usize {
        self.lock().edges.len()
    }

    /// Make every following `set_levels` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Raw `(mask, bits)` pairs written so far.
    pub fn writes(&self) -> Vec<(u64, u64)> {
        self.lock().writes.clone()
    }

    /// Writes expanded into per-line transitions.
    pub fn history(&self) -> Vec<LevelChange> {
        let state = self.lock();
        let mut changes = Vec::new();
        for &(mask, bits) in &state.writes {
            for (idx, &line) in state.outputs.iter().enumerate() {
                let bit = 1u64 << idx;
                if mask & bit != 0 {
                    changes.push(LevelChange {
                        line,
                        high: bits & bit != 0,
                    });
                }
            }
        }
        changes
    }

    pub fn reset_history(&self) {
        self.lock().writes.clear();
    }

    /// Current level of an output line.
    pub fn level(&self, line: u32) -> bool {
        let state = self.lock();
        state
            .outputs
            .iter()
            .position(|&l| l == line)
            .is_some_and(|idx| state.levels & (1u64 << idx) != 0)
    }
}

impl LineChip for MockChip {
    fn poll_edge(&mut self, _timeout: Duration) -> Result<Option<RawEdge>, LineError> {
        Ok(self.lock().edges.pop_front())
    }

    fn set_levels(&mut self, mask: u64, bits: u64) -> Result<(), LineError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(LineError::Io(std::io::Error::other("mock write failure")));
        }
        state.writes.push((mask, bits));
        state.levels = (state.levels & !mask) | (bits & mask);
        Ok(())
    }
}
