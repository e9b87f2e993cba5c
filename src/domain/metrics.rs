use crate::domain::models::{Event, Task};
use crate::domain::timer::TimerState;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardMetrics {
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub completion_rate: u32,
    pub upcoming_count: usize,
    pub focus_minutes_today: u32,
}

/// Recomputed on every read; nothing here is cached.
pub fn compute_metrics(
    tasks: &[Task],
    events: &[Event],
    timer: &TimerState,
    now: DateTime<Utc>,
) -> DashboardMetrics {
    let completed_tasks = tasks.iter().filter(|task| task.done).count();
    DashboardMetrics {
        completed_tasks,
        total_tasks: tasks.len(),
        completion_rate: completion_rate(completed_tasks, tasks.len()),
        upcoming_count: events.iter().filter(|event| event.start > now).count(),
        // Proxy metric: completed sessions at the current focus length.
        focus_minutes_today: timer.completed_sessions.saturating_mul(timer.focus_minutes),
    }
}

/// Percentage rounded half-up; 0 for an empty list.
pub fn completion_rate(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed * 200 + total) / (total * 2)) as u32
}
