use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::RwLock;

/// Result of one step of one message's handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Succeeded => write!(f, "succeeded"),
            StepOutcome::Failed => write!(f, "failed"),
            StepOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Steps that either worked or didn't.
impl From<bool> for StepOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            StepOutcome::Succeeded
        } else {
            StepOutcome::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeCount {
    pub worker: &'static str,
    pub step: &'static str,
    pub outcome: StepOutcome,
    pub count: u64,
}

/// Running tally of step outcomes per worker.
///
/// Messages are acknowledged even when some of their steps fail, so this
/// tally is where partial failures show up.
#[derive(Debug, Default)]
pub struct OutcomeLedger {
    counts: RwLock<BTreeMap<(&'static str, &'static str, StepOutcome), u64>>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, worker: &'static str, step: &'static str, outcome: StepOutcome) {
        tracing::debug!(worker, step, outcome = %outcome, "Step outcome");
        *self
            .counts
            .write()
            .await
            .entry((worker, step, outcome))
            .or_insert(0) += 1;
    }

    pub async fn count(&self, worker: &str, step: &str, outcome: StepOutcome) -> u64 {
        self.counts
            .read()
            .await
            .iter()
            .find(|((w, s, o), _)| *w == worker && *s == step && *o == outcome)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub async fn snapshot(&self) -> Vec<OutcomeCount> {
        self.counts
            .read()
            .await
            .iter()
            .map(|(&(worker, step, outcome), &count)| OutcomeCount {
                worker,
                step,
                outcome,
                count,
            })
            .collect()
    }
}
