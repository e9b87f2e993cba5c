//! Focus/break interval timer.
//!
//! `TimerState::transition` is a pure `(state, event) -> state` function. Nothing
//! here knows about wall-clock time; callers feed one `TimerEvent::Tick` per
//! elapsed second.

use serde::Serialize;
use std::ops::RangeInclusive;
use thiserror::Error;

pub const DEFAULT_FOCUS_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
pub const FOCUS_MINUTES_RANGE: RangeInclusive<u32> = 15..=60;
pub const BREAK_MINUTES_RANGE: RangeInclusive<u32> = 5..=30;
pub const MINUTES_STEP: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
    Break,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Break => "break",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Start,
    Pause,
    Resume,
    Reset,
    Finish,
    Tick,
    SetFocusMinutes(u32),
    SetBreakMinutes(u32),
}

impl TimerEvent {
    fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Reset => "reset",
            Self::Finish => "finish",
            Self::Tick => "tick",
            Self::SetFocusMinutes(_) => "set focus minutes",
            Self::SetBreakMinutes(_) => "set break minutes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("cannot {event} while {phase}")]
    InvalidTransition {
        phase: &'static str,
        event: &'static str,
    },
    #[error("{field} must be between {min} and {max} in steps of {step}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
        step: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerState {
    pub phase: TimerPhase,
    pub seconds_left: u32,
    pub focus_minutes: u32,
    pub break_minutes: u32,
    pub completed_sessions: u32,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::idle(DEFAULT_FOCUS_MINUTES, DEFAULT_BREAK_MINUTES)
    }
}

impl TimerState {
    pub fn new(focus_minutes: u32, break_minutes: u32) -> Result<Self, TimerError> {
        validate_minutes("focus_minutes", focus_minutes, &FOCUS_MINUTES_RANGE)?;
        validate_minutes("break_minutes", break_minutes, &BREAK_MINUTES_RANGE)?;
        Ok(Self::idle(focus_minutes, break_minutes))
    }

    fn idle(focus_minutes: u32, break_minutes: u32) -> Self {
        Self {
            phase: TimerPhase::Idle,
            seconds_left: focus_minutes * 60,
            focus_minutes,
            break_minutes,
            completed_sessions: 0,
        }
    }

    /// Fresh idle state with the same configured lengths; used on sign-out.
    pub fn cleared(&self) -> Self {
        Self::idle(self.focus_minutes, self.break_minutes)
    }

    /// Length of the current phase, for progress display.
    pub fn phase_seconds(&self) -> u32 {
        match self.phase {
            TimerPhase::Break => self.break_minutes * 60,
            _ => self.focus_minutes * 60,
        }
    }

    pub fn transition(&self, event: TimerEvent) -> Result<Self, TimerError> {
        let mut next = self.clone();
        match (self.phase, event) {
            (TimerPhase::Idle, TimerEvent::Start) => {
                next.phase = TimerPhase::Running;
                next.seconds_left = self.focus_minutes * 60;
            }
            (TimerPhase::Running, TimerEvent::Pause) => next.phase = TimerPhase::Paused,
            (TimerPhase::Paused, TimerEvent::Resume) => next.phase = TimerPhase::Running,
            (_, TimerEvent::Reset) | (TimerPhase::Break, TimerEvent::Finish) => {
                next.phase = TimerPhase::Idle;
                next.seconds_left = self.focus_minutes * 60;
            }
            (TimerPhase::Idle | TimerPhase::Paused, TimerEvent::Tick) => {}
            (TimerPhase::Running, TimerEvent::Tick) => {
                next.seconds_left = self.seconds_left.saturating_sub(1);
                if next.seconds_left == 0 {
                    next.phase = TimerPhase::Break;
                    next.completed_sessions = self.completed_sessions.saturating_add(1);
                    next.seconds_left = self.break_minutes * 60;
                }
            }
            (TimerPhase::Break, TimerEvent::Tick) => {
                next.seconds_left = self.seconds_left.saturating_sub(1);
                if next.seconds_left == 0 {
                    next.phase = TimerPhase::Idle;
                    next.seconds_left = self.focus_minutes * 60;
                }
            }
            (phase, TimerEvent::SetFocusMinutes(minutes)) => {
                validate_minutes("focus_minutes", minutes, &FOCUS_MINUTES_RANGE)?;
                next.focus_minutes = minutes;
                if phase == TimerPhase::Idle {
                    next.seconds_left = minutes * 60;
                }
            }
            (_, TimerEvent::SetBreakMinutes(minutes)) => {
                validate_minutes("break_minutes", minutes, &BREAK_MINUTES_RANGE)?;
                next.break_minutes = minutes;
            }
            (phase, event) => {
                return Err(TimerError::InvalidTransition {
                    phase: phase.as_str(),
                    event: event.name(),
                });
            }
        }
        Ok(next)
    }

    pub fn apply(&mut self, event: TimerEvent) -> Result<(), TimerError> {
        *self = self.transition(event)?;
        Ok(())
    }
}

fn validate_minutes(
    field: &'static str,
    value: u32,
    range: &RangeInclusive<u32>,
) -> Result<(), TimerError> {
    if range.contains(&value) && value % MINUTES_STEP == 0 {
        return Ok(());
    }
    Err(TimerError::OutOfRange {
        field,
        value,
        min: *range.start(),
        max: *range.end(),
        step: MINUTES_STEP,
    })
}
