//! Task Run and Execution States
//!
//! A [`State`] is the current [`StateType`] plus the append-only history
//! of every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a task run or an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    /// Created, not yet picked up
    #[default]
    Created,
    /// Being executed (or, for flowable tasks, children in progress)
    Running,
    /// A failed attempt is being run again
    Retrying,
    /// A kill was requested
    Killing,
    /// Finished successfully
    Success,
    /// Finished, with warnings
    Warning,
    /// Finished with an error; also the state once retries are exhausted
    Failed,
    /// Killed before finishing
    Killed,
}

/// Coarse classification of a [`StateType`] used when aggregating children.
///
/// Ordered by precedence: a later variant dominates an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    NonTerminal,
    Success,
    Warning,
    Failure,
}

impl StateType {
    pub fn classify(&self) -> Outcome {
        match self {
            Self::Created | Self::Running | Self::Retrying | Self::Killing => Outcome::NonTerminal,
            Self::Success => Outcome::Success,
            Self::Warning => Outcome::Warning,
            Self::Failed | Self::Killed => Outcome::Failure,
        }
    }

    /// Returns true if no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        self.classify() != Outcome::NonTerminal
    }

    /// Returns true for FAILED and KILLED.
    pub fn is_failed(&self) -> bool {
        self.classify() == Outcome::Failure
    }

    /// Precedence among terminal states: KILLED > FAILED > WARNING > SUCCESS.
    fn severity(&self) -> u8 {
        match self {
            Self::Killed => 4,
            Self::Failed => 3,
            Self::Warning => 2,
            Self::Success => 1,
            _ => 0,
        }
    }
}

/// Folds terminal states into the one that dominates.
///
/// Returns SUCCESS for an empty input.
pub fn worst_state(states: impl IntoIterator<Item = StateType>) -> StateType {
    states
        .into_iter()
        .filter(StateType::is_terminal)
        .max_by_key(StateType::severity)
        .unwrap_or(StateType::Success)
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub state: StateType,
    pub date: DateTime<Utc>,
}

/// Current state and transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub current: StateType,
    pub histories: Vec<History>,
}

impl State {
    /// A fresh CREATED state.
    pub fn new() -> Self {
        Self::at(StateType::Created, Utc::now())
    }

    pub fn at(state: StateType, date: DateTime<Utc>) -> Self {
        Self {
            current: state,
            histories: vec![History { state, date }],
        }
    }

    /// Records a transition. Terminal states are final.
    ///
    /// Returns false when the transition was refused.
    pub fn transition(&mut self, next: StateType) -> bool {
        self.transition_at(next, Utc::now())
    }

    pub fn transition_at(&mut self, next: StateType, date: DateTime<Utc>) -> bool {
        if self.current.is_terminal() {
            return false;
        }
        self.current = next;
        self.histories.push(History { state: next, date });
        true
    }

    /// Date of the first transition into `state`.
    pub fn first_date_of(&self, state: StateType) -> Option<DateTime<Utc>> {
        self.histories.iter().find(|h| h.state == state).map(|h| h.date)
    }

    /// Date of the terminal transition, if any.
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.histories
            .last()
            .filter(|h| h.state.is_terminal())
            .map(|h| h.date)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(StateType::Created.classify(), Outcome::NonTerminal);
        assert_eq!(StateType::Running.classify(), Outcome::NonTerminal);
        assert_eq!(StateType::Retrying.classify(), Outcome::NonTerminal);
        assert_eq!(StateType::Killing.classify(), Outcome::NonTerminal);
        assert_eq!(StateType::Success.classify(), Outcome::Success);
        assert_eq!(StateType::Warning.classify(), Outcome::Warning);
        assert_eq!(StateType::Failed.classify(), Outcome::Failure);
        assert_eq!(StateType::Killed.classify(), Outcome::Failure);
    }

    #[test]
    fn test_outcome_precedence() {
        assert!(Outcome::Failure > Outcome::Warning);
        assert!(Outcome::Warning > Outcome::Success);
    }

    #[test]
    fn test_worst_state() {
        use StateType::*;
        assert_eq!(worst_state([Success, Warning, Success]), Warning);
        assert_eq!(worst_state([Warning, Failed, Success]), Failed);
        assert_eq!(worst_state([Failed, Killed]), Killed);
        assert_eq!(worst_state([Killed, Failed]), Killed);
        assert_eq!(worst_state([]), Success);
        assert_eq!(worst_state([Running]), Success);
    }

    #[test]
    fn test_transition_history() {
        let mut state = State::new();
        assert!(state.transition(StateType::Running));
        assert!(state.transition(StateType::Success));

        assert_eq!(state.current, StateType::Success);
        assert_eq!(state.histories.len(), 3);
        assert!(state.end_date().is_some());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut state = State::new();
        state.transition(StateType::Failed);
        assert!(!state.transition(StateType::Running));
        assert_eq!(state.current, StateType::Failed);
        assert_eq!(state.histories.len(), 2);
    }

    #[test]
    fn test_serialization_names() {
        let json = serde_json::to_string(&StateType::Killed).unwrap();
        assert_eq!(json, "\"KILLED\"");
    }

    #[test]
    fn test_first_date_of() {
        let mut state = State::new();
        assert!(state.first_date_of(StateType::Running).is_none());
        state.transition(StateType::Running);
        assert!(state.first_date_of(StateType::Running).is_some());
        assert!(state.end_date().is_none());
    }
}
