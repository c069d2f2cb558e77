//! Optional parse telemetry and debug tracing.
//!
//! Both are off by default and carried out-of-band on the [`crate::ParseTree`]
//! so the event stream itself stays byte-identical across option changes.

use std::time::Duration;

use serde::Serialize;

/// How much telemetry to collect while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TelemetryLevel {
    #[default]
    Off,
    /// Event/token/error/node counters.
    Counts,
    /// Counters plus wall-clock timing.
    CountsAndTiming,
}

/// How much debug tracing to collect while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TraceLevel {
    #[default]
    Off,
    /// One line per grammar-rule entry, with the token position.
    CallPaths,
    /// One line per emitted event.
    Events,
}

/// Counters collected during a parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseTelemetry {
    pub events: usize,
    pub tokens_consumed: usize,
    pub errors: usize,
    pub nodes: usize,
    /// Wall-clock parse duration; present at `CountsAndTiming`.
    pub elapsed: Option<Duration>,
}

/// Debug trace lines collected during a parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugTrace {
    pub lines: Vec<String>,
}
