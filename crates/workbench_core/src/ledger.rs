//! Append-only audit record of remote tool invocations, milestones and raw
//! request/response payloads.

pub type EntryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Running,
    Completed,
    Failed,
}

/// One remote tool invocation. Created `Running`, patched to exactly one
/// terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallEntry {
    pub id: EntryId,
    pub name: String,
    pub status: CallStatus,
    pub args: String,
    pub result: Option<String>,
    pub started_at: String,
    pub duration: Option<String>,
}

impl ToolCallEntry {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, CallStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneStatus {
    Completed,
    Failed,
    NeedsUser,
}

/// Visible run-history item. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestone {
    pub status: MilestoneStatus,
    pub title: String,
    pub subtext: Option<String>,
    pub timestamp: String,
    pub selected: bool,
}

impl Milestone {
    pub fn new(
        status: MilestoneStatus,
        title: impl Into<String>,
        subtext: Option<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            status,
            title: title.into(),
            subtext,
            timestamp: timestamp.into(),
            selected: false,
        }
    }

    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }
}

/// Uninterpreted request/response record for developer inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEntry {
    pub id: u64,
    pub label: String,
    pub payload: String,
    pub is_error: bool,
}

/// Append-only ledger. Entry ids are monotonically increasing and the three
/// sequences preserve insertion order; readers must not assume any ordering
/// beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuditLedger {
    next_entry_id: EntryId,
    next_log_id: u64,
    tool_calls: Vec<ToolCallEntry>,
    milestones: Vec<Milestone>,
    raw_logs: Vec<RawLogEntry>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `Running` entry for a remote call that is about to be issued.
    pub fn begin(
        &mut self,
        name: &str,
        args: &serde_json::Value,
        started_at: impl Into<String>,
    ) -> EntryId {
        self.next_entry_id += 1;
        let id = self.next_entry_id;
        self.tool_calls.push(ToolCallEntry {
            id,
            name: name.to_string(),
            status: CallStatus::Running,
            args: args.to_string(),
            result: None,
            started_at: started_at.into(),
            duration: None,
        });
        id
    }

    /// Patch an entry to `Completed`. No-op if the entry is already terminal,
    /// so a completion racing a cancellation cannot resurrect it.
    pub fn complete(&mut self, id: EntryId, result: impl Into<String>, duration: Option<String>) {
        self.terminalize(id, CallStatus::Completed, result.into(), duration);
    }

    /// Patch an entry to `Failed`. Idempotent like [`AuditLedger::complete`].
    pub fn fail(&mut self, id: EntryId, result: impl Into<String>, duration: Option<String>) {
        self.terminalize(id, CallStatus::Failed, result.into(), duration);
    }

    fn terminalize(&mut self, id: EntryId, status: CallStatus, result: String, duration: Option<String>) {
        if let Some(entry) = self.tool_calls.iter_mut().find(|e| e.id == id) {
            if entry.is_terminal() {
                return;
            }
            entry.status = status;
            entry.result = Some(result);
            entry.duration = duration;
        }
    }

    /// Terminalize every still-running entry, used when a run is cancelled
    /// while calls are in flight.
    pub fn fail_running(&mut self, result: &str) {
        for entry in self.tool_calls.iter_mut().filter(|e| !e.is_terminal()) {
            entry.status = CallStatus::Failed;
            entry.result = Some(result.to_string());
        }
    }

    pub fn note(&mut self, milestone: Milestone) {
        self.milestones.push(milestone);
    }

    pub fn log(&mut self, label: &str, payload: &serde_json::Value, is_error: bool) {
        self.next_log_id += 1;
        let rendered = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        self.raw_logs.push(RawLogEntry {
            id: self.next_log_id,
            label: label.to_string(),
            payload: rendered,
            is_error,
        });
    }

    pub fn tool_calls(&self) -> &[ToolCallEntry] {
        &self.tool_calls
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn raw_logs(&self) -> &[RawLogEntry] {
        &self.raw_logs
    }

    pub fn entry(&self, id: EntryId) -> Option<&ToolCallEntry> {
        self.tool_calls.iter().find(|e| e.id == id)
    }

    pub fn completed_calls(&self) -> usize {
        self.tool_calls
            .iter()
            .filter(|e| e.status == CallStatus::Completed)
            .count()
    }

    pub fn last_call_name(&self) -> Option<&str> {
        self.tool_calls.last().map(|e| e.name.as_str())
    }

    pub fn has_running(&self) -> bool {
        self.tool_calls.iter().any(|e| !e.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditLedger, CallStatus};
    use serde_json::json;

    #[test]
    fn entries_get_increasing_ids_in_insertion_order() {
        let mut ledger = AuditLedger::new();
        let a = ledger.begin("fetch_sample", &json!({"source_id": "s1"}), "00:00");
        let b = ledger.begin("chat_analysis", &json!({"source_id": "s1"}), "00:01");
        assert!(a < b);
        let names: Vec<_> = ledger.tool_calls().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["fetch_sample", "chat_analysis"]);
    }

    #[test]
    fn terminal_status_is_write_once() {
        let mut ledger = AuditLedger::new();
        let id = ledger.begin("rag_query", &json!({}), "00:00");
        ledger.complete(id, "5 chunks retrieved", Some("0.4s".into()));
        ledger.fail(id, "late failure", None);

        let entry = ledger.entry(id).unwrap();
        assert_eq!(entry.status, CallStatus::Completed);
        assert_eq!(entry.result.as_deref(), Some("5 chunks retrieved"));
        assert_eq!(entry.duration.as_deref(), Some("0.4s"));
    }

    #[test]
    fn fail_running_skips_terminal_entries() {
        let mut ledger = AuditLedger::new();
        let done = ledger.begin("fetch_sample", &json!({}), "00:00");
        ledger.complete(done, "ok", None);
        let open = ledger.begin("chat_analysis", &json!({}), "00:01");

        ledger.fail_running("cancelled");

        assert_eq!(ledger.entry(done).unwrap().status, CallStatus::Completed);
        let open = ledger.entry(open).unwrap();
        assert_eq!(open.status, CallStatus::Failed);
        assert_eq!(open.result.as_deref(), Some("cancelled"));
        assert!(!ledger.has_running());
    }

    #[test]
    fn raw_log_payload_is_pretty_printed() {
        let mut ledger = AuditLedger::new();
        ledger.log("tool_error: rag_query", &json!({"error": "boom"}), true);
        let entry = &ledger.raw_logs()[0];
        assert!(entry.is_error);
        assert!(entry.payload.contains("\"error\": \"boom\""));
    }
}
