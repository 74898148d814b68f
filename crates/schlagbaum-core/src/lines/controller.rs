//! Line controller: per-line state on top of a [`LineChip`].
//!
//! ## Outputs
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `set`     | drive active, record activation, cancel anti-flap guard |
//! | `clear`   | refused within `anti_flap` of the previous clear, else drive inactive |
//! | `sweep`   | clear every line active for longer than `auto_clear` |
//!
//! `sweep` runs every loop tick and is the only thing that turns off an
//! actuator whose "close" command got lost.
//!
//! ## Inputs
//!
//! An edge is accepted when its direction differs from the last accepted
//! edge on that line, or when `debounce` has passed since that edge. Only
//! accepted edges in the reported direction reach the caller.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use super::{EdgeDirection, LineChip, LineError, MAX_LINES, RawEdge};

/// Current time on the runtime clock.
///
/// Follows tokio's clock so paused-time tests drive the timers too.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Timing rules applied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTiming {
    /// An active output is forced inactive after this long.
    pub auto_clear: Duration,
    /// Minimum gap between two clears of the same output.
    pub anti_flap: Duration,
    /// Same-direction edges closer than this are bounce.
    pub debounce: Duration,
    /// Minimum gap between two hardware edge polls.
    pub poll_interval: Duration,
    /// Longest the chip may block waiting for an edge.
    pub edge_wait: Duration,
}

impl Default for LineTiming {
    fn default() -> Self {
        Self {
            auto_clear: Duration::from_secs(60),
            anti_flap: Duration::from_secs(1),
            debounce: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
            edge_wait: Duration::from_millis(1),
        }
    }
}

#[derive(Debug)]
struct OutputLine {
    line: u32,
    active: bool,
    activated_at: Option<Instant>,
    deactivated_at: Option<Instant>,
}

#[derive(Debug)]
struct InputLine {
    line: u32,
    last_direction: Option<EdgeDirection>,
    last_edge: Option<Duration>,
}

/// Owns the output/input line state for one role.
#[derive(Debug)]
pub struct LineController<C> {
    chip: C,
    outputs: Vec<OutputLine>,
    inputs: Vec<InputLine>,
    timing: LineTiming,
    report: EdgeDirection,
    last_poll: Option<Instant>,
}

impl<C: LineChip> LineController<C> {
    /// Build the controller and drive every output inactive.
    pub fn new(
        chip: C,
        outputs: &[u32],
        inputs: &[u32],
        timing: LineTiming,
        report: EdgeDirection,
    ) -> Result<Self, LineError> {
        if outputs.len() > MAX_LINES {
            return Err(LineError::TooManyLines(outputs.len()));
        }
        if inputs.len() > MAX_LINES {
            return Err(LineError::TooManyLines(inputs.len()));
        }

        let mut controller = Self {
            chip,
            outputs: outputs
                .iter()
                .map(|&line| OutputLine {
                    line,
                    active: false,
                    activated_at: None,
                    deactivated_at: None,
                })
                .collect(),
            inputs: inputs
                .iter()
                .map(|&line| InputLine {
                    line,
                    last_direction: None,
                    last_edge: None,
                })
                .collect(),
            timing,
            report,
            last_poll: None,
        };
        controller.release()?;
        debug!(
            outputs = ?outputs,
            inputs = ?inputs,
            "Line controller ready"
        );
        Ok(controller)
    }

    /// Drive a line active. Always allowed.
    pub fn set(&mut self, line: u32, now: Instant) -> Result<(), LineError> {
        let idx = self.output_index(line)?;
        let bit = 1u64 << idx;
        self.chip.set_levels(bit, bit)?;

        let out = &mut self.outputs[idx];
        out.active = true;
        out.activated_at = Some(now);
        out.deactivated_at = None;
        info!(line, "Output set");
        Ok(())
    }

    /// Drive a line inactive unless the anti-flap guard is still holding.
    ///
    /// A refused clear leaves the line untouched.
    pub fn clear(&mut self, line: u32, now: Instant) -> Result<(), LineError> {
        let idx = self.output_index(line)?;
        if let Some(at) = self.outputs[idx].deactivated_at {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < self.timing.anti_flap {
                return Err(LineError::Guarded {
                    line,
                    elapsed_ms: elapsed.as_millis(),
                });
            }
        }

        self.chip.set_levels(1u64 << idx, 0)?;

        let out = &mut self.outputs[idx];
        let was_active = out.active;
        out.active = false;
        out.activated_at = None;
        out.deactivated_at = Some(now);
        if was_active {
            info!(line, "Output cleared");
        } else {
            debug!(line, "Output cleared (was inactive)");
        }
        Ok(())
    }

    /// Clear every output that has been active for `auto_clear` or longer.
    ///
    /// Returns the lines that were cleared.
    pub fn sweep(&mut self, now: Instant) -> Vec<u32> {
        let expired: Vec<u32> = self
            .outputs
            .iter()
            .filter(|o| {
                o.active
                    && o.activated_at.is_some_and(|at| {
                        now.saturating_duration_since(at) >= self.timing.auto_clear
                    })
            })
            .map(|o| o.line)
            .collect();

        let mut cleared = Vec::with_capacity(expired.len());
        for line in expired {
            match self.clear(line, now) {
                Ok(()) => {
                    info!(line, "Output auto-cleared after timeout");
                    cleared.push(line);
                }
                Err(e) => error!(line, error = %e, "Auto-clear failed"),
            }
        }
        cleared
    }

    /// Read at most one edge from the chip and filter it.
    ///
    /// The chip is only consulted once per `poll_interval`.
    pub fn poll_edge(&mut self, now: Instant) -> Result<Option<RawEdge>, LineError> {
        if self.inputs.is_empty() {
            return Ok(None);
        }
        if let Some(last) = self.last_poll
            && now.saturating_duration_since(last) < self.timing.poll_interval
        {
            return Ok(None);
        }
        self.last_poll = Some(now);

        let Some(edge) = self.chip.poll_edge(self.timing.edge_wait)? else {
            return Ok(None);
        };

        let debounce = self.timing.debounce;
        let Some(input) = self.inputs.iter_mut().find(|i| i.line == edge.line) else {
            debug!(line = edge.line, "Edge on unconfigured line ignored");
            return Ok(None);
        };

        let accepted = input.last_direction != Some(edge.direction)
            || input
                .last_edge
                .is_none_or(|t| edge.timestamp.saturating_sub(t) >= debounce);
        if !accepted {
            trace!(line = edge.line, direction = ?edge.direction, "Bounce filtered");
            return Ok(None);
        }
        input.last_direction = Some(edge.direction);
        input.last_edge = Some(edge.timestamp);

        if edge.direction != self.report {
            trace!(line = edge.line, direction = ?edge.direction, "Edge accepted, not reported");
            return Ok(None);
        }
        debug!(line = edge.line, direction = ?edge.direction, "Edge accepted");
        Ok(Some(edge))
    }

    /// Drive every output inactive, ignoring the anti-flap guard.
    pub fn release(&mut self) -> Result<(), LineError> {
        if self.outputs.is_empty() {
            return Ok(());
        }
        let mask = if self.outputs.len() == MAX_LINES {
            u64::MAX
        } else {
            (1u64 << self.outputs.len()) - 1
        };
        self.chip.set_levels(mask, 0)?;
        for out in &mut self.outputs {
            out.active = false;
            out.activated_at = None;
        }
        Ok(())
    }

    pub fn is_active(&self, line: u32) -> bool {
        self.outputs.iter().any(|o| o.line == line && o.active)
    }

    /// Lines currently driven active.
    pub fn active_lines(&self) -> Vec<u32> {
        self.outputs
            .iter()
            .filter(|o| o.active)
            .map(|o| o.line)
            .collect()
    }

    fn output_index(&self, line: u32) -> Result<usize, LineError> {
        self.outputs
            .iter()
            .position(|o| o.line == line)
            .ok_or(LineError::UnknownLine(line))
    }
}
