//! Command dispatch: wire tokens to line transitions and back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandTable};
use crate::lines::{LineChip, LineController, LineError, RawEdge, controller};

/// How an accepted input edge is put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeFormat {
    /// Direction and line offset, e.g. `up18`.
    #[default]
    Raw,
    /// Command bound to the line in the local input table, e.g. `open`.
    Command,
}

/// Server answer to one framed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Fail,
}

impl Reply {
    pub const fn from_success(ok: bool) -> Self {
        if ok { Self::Ok } else { Self::Fail }
    }

    /// Wire frame, newline terminated.
    pub const fn frame(self) -> &'static str {
        match self {
            Self::Ok => "OK\n",
            Self::Fail => "FAIL\n",
        }
    }

    /// Recognise a reply token (terminator already stripped).
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "OK" => Some(Self::Ok),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Table-driven mapping between tokens and line actions for one role.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    outputs: CommandTable,
    inputs: CommandTable,
    exclusive: Vec<Command>,
    settle: Duration,
    edge_format: EdgeFormat,
}

impl Dispatcher {
    /// `exclusive` lists commands whose lines must never be active together;
    /// dispatching one of them clears all of them first and waits `settle`.
    pub fn new(
        outputs: CommandTable,
        inputs: CommandTable,
        exclusive: Vec<Command>,
        settle: Duration,
        edge_format: EdgeFormat,
    ) -> Self {
        Self {
            outputs,
            inputs,
            exclusive,
            settle,
            edge_format,
        }
    }

    /// Apply one inbound token. Returns whether a line was driven.
    ///
    /// Unknown tokens and tokens without an output line fail without
    /// touching any line.
    pub async fn dispatch<C: LineChip>(&self, token: &str, lines: &mut LineController<C>) -> bool {
        let Ok(command) = token.parse::<Command>() else {
            debug!(token, "Unknown command");
            return false;
        };
        let Some(line) = self.outputs.line_for(command) else {
            debug!(%command, "No output line bound to command");
            return false;
        };

        if self.exclusive.contains(&command) {
            self.clear_exclusive(command, lines);
            tokio::time::sleep(self.settle).await;
        }

        match lines.set(line, controller::now()) {
            Ok(()) => {
                info!(%command, line, "Command applied");
                true
            }
            Err(e) => {
                error!(%command, line, error = %e, "Cannot drive line");
                false
            }
        }
    }

    fn clear_exclusive<C: LineChip>(&self, command: Command, lines: &mut LineController<C>) {
        debug!(%command, "Clearing mutually exclusive outputs first");
        let now = controller::now();
        for other in &self.exclusive {
            let Some(line) = self.outputs.line_for(*other) else {
                continue;
            };
            match lines.clear(line, now) {
                Ok(()) | Err(LineError::Guarded { .. }) => {}
                Err(e) => warn!(line, error = %e, "Cannot clear exclusive output"),
            }
        }
    }

    /// Wire frame for an accepted edge, `None` if the line is not in the
    /// local input table.
    pub fn encode_edge(&self, edge: &RawEdge) -> Option<String> {
        let command = self.inputs.command_for(edge.line)?;
        Some(match self.edge_format {
            EdgeFormat::Raw => format!("{}{}\n", edge.direction.wire_prefix(), edge.line),
            EdgeFormat::Command => command.frame(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lines::mock::{LevelChange, MockChip};
    use crate::lines::{EdgeDirection, LineTiming};

    const SETTLE: Duration = Duration::from_millis(100);

    fn server() -> (Dispatcher, MockChip, LineController<MockChip>) {
        let outputs = CommandTable::server_outputs();
        let chip = MockChip::new(&outputs.lines());
        let lines = LineController::new(
            chip.clone(),
            &outputs.lines(),
            &CommandTable::server_inputs().lines(),
            LineTiming::default(),
            EdgeDirection::Rising,
        )
        .unwrap();
        let dispatcher = Dispatcher::new(
            outputs,
            CommandTable::server_inputs(),
            vec![Command::Open, Command::Close],
            SETTLE,
            EdgeFormat::Raw,
        );
        chip.reset_history();
        (dispatcher, chip, lines)
    }

    fn edge(line: u32) -> RawEdge {
        RawEdge {
            line,
            direction: EdgeDirection::Rising,
            timestamp: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_clears_both_waits_then_sets() {
        let (dispatcher, chip, mut lines) = server();
        let start = tokio::time::Instant::now();

        assert!(dispatcher.dispatch("open", &mut lines).await);
        assert!(start.elapsed() >= SETTLE);
        assert_eq!(
            chip.history(),
            vec![
                LevelChange { line: 17, high: false },
                LevelChange { line: 27, high: false },
                LevelChange { line: 17, high: true },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_then_close_never_overlaps() {
        let (dispatcher, chip, mut lines) = server();

        assert!(dispatcher.dispatch("open", &mut lines).await);
        assert!(dispatcher.dispatch("close", &mut lines).await);
        assert!(lines.is_active(27));
        assert!(!lines.is_active(17));

        let mut open = false;
        let mut close = false;
        for change in chip.history() {
            match change.line {
                17 => open = change.high,
                27 => close = change.high,
                _ => {}
            }
            assert!(!(open && close), "open and close driven together");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn siren_is_not_interlocked() {
        let (dispatcher, chip, mut lines) = server();
        let start = tokio::time::Instant::now();

        assert!(dispatcher.dispatch("siren", &mut lines).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(chip.history(), vec![LevelChange { line: 22, high: true }]);
    }

    #[tokio::test]
    async fn unknown_or_unbound_token_has_no_side_effect() {
        let (dispatcher, chip, mut lines) = server();

        assert!(!dispatcher.dispatch("launch", &mut lines).await);
        assert!(!dispatcher.dispatch("led0", &mut lines).await);
        assert!(!dispatcher.dispatch("", &mut lines).await);
        assert!(chip.writes().is_empty());
    }

    #[tokio::test]
    async fn failed_write_reports_failure() {
        let (dispatcher, chip, mut lines) = server();
        chip.fail_writes(true);
        assert!(!dispatcher.dispatch("siren", &mut lines).await);
    }

    #[test]
    fn raw_edge_encoding() {
        let dispatcher = Dispatcher::new(
            CommandTable::client_outputs(),
            CommandTable::client_inputs(),
            Vec::new(),
            Duration::ZERO,
            EdgeFormat::Raw,
        );
        assert_eq!(dispatcher.encode_edge(&edge(18)).as_deref(), Some("up18\n"));
        assert_eq!(dispatcher.encode_edge(&edge(25)), None);

        let down = RawEdge {
            direction: EdgeDirection::Falling,
            ..edge(23)
        };
        assert_eq!(dispatcher.encode_edge(&down).as_deref(), Some("down23\n"));
    }

    #[test]
    fn command_edge_encoding_uses_input_table() {
        let dispatcher = Dispatcher::new(
            CommandTable::client_outputs(),
            CommandTable::client_inputs(),
            Vec::new(),
            Duration::ZERO,
            EdgeFormat::Command,
        );
        assert_eq!(dispatcher.encode_edge(&edge(18)).as_deref(), Some("open\n"));
        assert_eq!(dispatcher.encode_edge(&edge(24)).as_deref(), Some("siren\n"));
    }

    #[test]
    fn reply_frames() {
        assert_eq!(Reply::from_success(true).frame(), "OK\n");
        assert_eq!(Reply::from_success(false).frame(), "FAIL\n");
        assert_eq!(Reply::parse("FAIL"), Some(Reply::Fail));
        assert_eq!(Reply::parse("ping"), None);
    }
}
