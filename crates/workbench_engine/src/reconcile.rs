//! Reconciliation of one streamed chat turn: merges the incremental partial
//! answer with the authoritative final answer into a single display string
//! that advances at the pacing rate, and guarantees the turn finalizes at
//! most once.

use std::collections::VecDeque;

use crate::sse::StreamEvent;
use crate::types::ThoughtStep;

/// Immediate reactions the pacing driver should forward to the shell.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnSignal {
    Session(u64),
    Thought(ThoughtStep),
}

#[derive(Debug, Default)]
pub struct TurnReconciler {
    session_id: Option<u64>,
    thoughts: Vec<ThoughtStep>,
    final_thoughts: Option<Vec<ThoughtStep>>,
    /// Everything the server has confirmed so far (all chunk deltas, later
    /// replaced by the final answer).
    confirmed: String,
    /// Characters confirmed but not yet shown; drained by the pacing loop.
    pending: VecDeque<char>,
    displayed: String,
    final_answer: Option<String>,
    done_received: bool,
    finalized: bool,
    failure: Option<String>,
}

impl TurnReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stream event into the turn. Session and fresh thought
    /// events are returned so the driver can surface them immediately;
    /// chunk/done/error only change internal state.
    pub fn apply(&mut self, event: StreamEvent) -> Vec<TurnSignal> {
        match event {
            StreamEvent::Session { session_id } => {
                // Last write wins; the server may reassign mid-turn.
                self.session_id = Some(session_id);
                vec![TurnSignal::Session(session_id)]
            }
            StreamEvent::Thought(step) => {
                let duplicate = self
                    .thoughts
                    .iter()
                    .any(|t| t.phase == step.phase && t.message == step.message);
                if duplicate {
                    Vec::new()
                } else {
                    self.thoughts.push(step.clone());
                    vec![TurnSignal::Thought(step)]
                }
            }
            StreamEvent::Chunk { delta } => {
                // Once the final answer arrived it is authoritative; stale
                // deltas behind it are dropped.
                if !self.done_received {
                    self.confirmed.push_str(&delta);
                    self.pending.extend(delta.chars());
                }
                Vec::new()
            }
            StreamEvent::Done {
                answer,
                session_id,
                thought_steps,
                side_effects: _,
            } => {
                let mut signals = Vec::new();
                if let Some(id) = session_id {
                    self.session_id = Some(id);
                    signals.push(TurnSignal::Session(id));
                }
                if !thought_steps.is_empty() {
                    self.final_thoughts = Some(thought_steps);
                }
                self.reconcile_done(answer);
                signals
            }
            StreamEvent::Error { message } => {
                self.failure = Some(message);
                Vec::new()
            }
        }
    }

    /// The reconciliation policy, applied in order:
    /// (a) nothing streamed yet: seed the queue with the full answer;
    /// (b) the answer extends the streamed text: enqueue only the suffix;
    /// (c) the answer diverges: drop the streamed text and start over, so
    ///     stale partial output is never shown.
    fn reconcile_done(&mut self, answer: String) {
        self.done_received = true;
        if self.confirmed.is_empty() {
            self.pending.extend(answer.chars());
        } else if answer.starts_with(&self.confirmed) {
            self.pending.extend(answer[self.confirmed.len()..].chars());
        } else {
            self.displayed.clear();
            self.pending.clear();
            self.pending.extend(answer.chars());
        }
        self.confirmed = answer.clone();
        self.final_answer = Some(answer);
    }

    /// Release up to `max_chars` pending characters into the display
    /// string. Returns whether the display changed.
    pub fn advance(&mut self, max_chars: usize) -> bool {
        let mut changed = false;
        for _ in 0..max_chars {
            let Some(c) = self.pending.pop_front() else {
                break;
            };
            self.displayed.push(c);
            changed = true;
        }
        changed
    }

    /// Exactly-once finalization: the first call after the queue drains and
    /// `done` was seen yields the committed text; every later call yields
    /// `None`, no matter which call site won the race.
    pub fn try_finalize(&mut self) -> Option<String> {
        if self.finalized || !self.done_received || !self.pending.is_empty() {
            return None;
        }
        self.finalized = true;
        let best = self
            .final_answer
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                if self.confirmed.is_empty() {
                    self.displayed.clone()
                } else {
                    self.confirmed.clone()
                }
            });
        Some(best)
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn done_received(&self) -> bool {
        self.done_received
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Thought steps to attach to the finalized message; the final list
    /// from `done` overrides the incremental one when present.
    pub fn thought_steps(&self) -> Vec<ThoughtStep> {
        self.final_thoughts
            .clone()
            .unwrap_or_else(|| self.thoughts.clone())
    }
}
