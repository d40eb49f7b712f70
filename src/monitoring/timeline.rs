//! Execution Timeline
//!
//! Derives task run start/end times from state histories for
//! execution reports and Gantt charts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::runtime::{Execution, StateType, TaskRun};

/// Timing of a single task run.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Task id, with the iteration value when there is one
    pub label: String,
    pub state: StateType,
    pub start: DateTime<Utc>,
    /// `None` while the run is not finished
    pub end: Option<DateTime<Utc>>,
}

impl TimelineEntry {
    fn from_task_run(run: &TaskRun) -> Option<Self> {
        let start = run.state.first_date_of(StateType::Running)?;
        let label = match &run.value {
            Some(value) => format!("{}[{}]", run.task_id, value),
            None => run.task_id.clone(),
        };
        Some(Self {
            label,
            state: run.state.current,
            start,
            end: run.state.end_date(),
        })
    }

    /// Duration in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_milliseconds().max(0))
    }
}

/// Timeline of every task run that started, in start order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTimeline {
    entries: Vec<TimelineEntry>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl ExecutionTimeline {
    /// Builds the timeline of an execution from its recorded histories.
    pub fn from_execution(execution: &Execution) -> Self {
        let mut entries: Vec<TimelineEntry> = execution
            .task_runs
            .iter()
            .filter_map(TimelineEntry::from_task_run)
            .collect();
        entries.sort_by_key(|entry| entry.start);

        let start_time = execution
            .state
            .first_date_of(StateType::Running)
            .or_else(|| entries.first().map(|e| e.start));
        let end_time = execution
            .state
            .end_date()
            .or_else(|| entries.iter().filter_map(|e| e.end).max());

        Self {
            entries,
            start_time,
            end_time,
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Total execution time in milliseconds.
    pub fn total_ms(&self) -> i64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0),
            _ => 0,
        }
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each task run is shown as a bar indicating when it ran
    /// relative to the total execution time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let (Some(origin), total_time) = (self.start_time, self.total_ms()) else {
            return output;
        };
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        for entry in &self.entries {
            let Some(duration_ms) = entry.duration_ms() else {
                continue;
            };
            let offset = (entry.start - origin).num_milliseconds().max(0);
            let start_pos = (offset as f64 * scale) as usize;
            let width = (duration_ms as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:16} |{}| ({} ms, {:?})\n",
                truncate(&entry.label, 16),
                bar,
                duration_ms,
                entry.state
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns task run durations in milliseconds, keyed by label.
    pub fn get_durations(&self) -> HashMap<String, i64> {
        self.entries
            .iter()
            .filter_map(|entry| entry.duration_ms().map(|d| (entry.label.clone(), d)))
            .collect()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
