//! Wave checkpointing (§4.7.1): an immutable log of `(phaseId,
//! resultDigest, contextDigest)` triples a later failure can resume from.

use hookbridge_protocol::{context_digest, result_digest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase_id: String,
    pub result_digest: String,
    pub context_digest: String,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointLog {
    entries: Vec<Checkpoint>,
}

impl CheckpointLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        phase_id: impl Into<String>,
        result_payload: &str,
        context: &hookbridge_protocol::Context,
    ) -> &Checkpoint {
        let metadata_json =
            serde_json::to_string(&context.metadata).unwrap_or_else(|_| "{}".to_string());
        let checkpoint = Checkpoint {
            phase_id: phase_id.into(),
            result_digest: result_digest(result_payload),
            context_digest: context_digest(&context.command, &context.flags, &context.scope, &metadata_json),
        };
        self.entries.push(checkpoint);
        self.entries.last().expect("just pushed")
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.entries.last()
    }

    pub fn find(&self, phase_id: &str) -> Option<&Checkpoint> {
        self.entries.iter().find(|c| c.phase_id == phase_id)
    }

    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookbridge_protocol::Context;

    #[test]
    fn record_then_find_by_phase_id() {
        let mut log = CheckpointLog::new();
        let ctx = Context::new("scan");
        log.record("phase-1", "{\"ok\":true}", &ctx);
        let found = log.find("phase-1").unwrap();
        assert!(!found.result_digest.is_empty());
        assert!(!found.context_digest.is_empty());
    }

    #[test]
    fn last_returns_most_recent_entry() {
        let mut log = CheckpointLog::new();
        let ctx = Context::new("scan");
        log.record("phase-1", "a", &ctx);
        log.record("phase-2", "b", &ctx);
        assert_eq!(log.last().unwrap().phase_id, "phase-2");
    }
}
