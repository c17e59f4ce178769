//! Dry-run settlement tool. Records every call and never touches a chain.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::tool::{SettlementTool, SubmitReceipt, TxArtifact, TxOutput};
use crate::{SettlementError, SettlementStep};

/// A transaction the dry-run tool accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunSubmission {
    pub id: String,
    pub source: String,
    pub outputs: Vec<TxOutput>,
    pub change_address: String,
    pub signing_key: String,
}

#[derive(Debug, Clone)]
struct Draft {
    source: String,
    outputs: Vec<TxOutput>,
    change_address: String,
    signing_key: Option<String>,
}

#[derive(Default)]
struct State {
    drafts: Vec<Draft>,
    submissions: Vec<DryRunSubmission>,
    calls: Vec<SettlementStep>,
    failure: Option<(SettlementStep, usize)>,
}

/// Records transactions instead of broadcasting them.
///
/// `fail_on(step, n)` makes the `n`-th call (0-based) of that step fail, which
/// is how tests simulate a tool failing mid-batch.
#[derive(Default)]
pub struct DryRunTool {
    state: Mutex<State>,
}

impl DryRunTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, step: SettlementStep, nth_call: usize) -> Self {
        self.state.lock().failure = Some((step, nth_call));
        self
    }

    /// Every accepted transaction, in submission order.
    pub fn submissions(&self) -> Vec<DryRunSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    /// Every call made, in order.
    pub fn calls(&self) -> Vec<SettlementStep> {
        self.state.lock().calls.clone()
    }

    fn record(&self, state: &mut State, step: SettlementStep) -> Result<(), SettlementError> {
        let nth = state.calls.iter().filter(|s| **s == step).count();
        state.calls.push(step);
        match state.failure {
            Some((fail_step, fail_nth)) if fail_step == step && fail_nth == nth => {
                Err(SettlementError::Rejected {
                    step,
                    detail: format!("dry-run failure injected on call {}", nth),
                })
            }
            _ => Ok(()),
        }
    }

    fn draft_index(handle: &str) -> Result<usize, SettlementError> {
        handle
            .rsplit('_')
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| SettlementError::InvalidOutput {
                step: SettlementStep::Sign,
                detail: format!("unknown dry-run handle {}", handle),
            })
    }
}

#[async_trait]
impl SettlementTool for DryRunTool {
    async fn build(
        &self,
        source: &str,
        outputs: &[TxOutput],
        change_address: &str,
    ) -> Result<TxArtifact, SettlementError> {
        let mut state = self.state.lock();
        self.record(&mut state, SettlementStep::Build)?;
        state.drafts.push(Draft {
            source: source.to_string(),
            outputs: outputs.to_vec(),
            change_address: change_address.to_string(),
            signing_key: None,
        });
        Ok(TxArtifact {
            handle: format!("draft_{}", state.drafts.len() - 1),
            description: format!("{} outputs, change to {}", outputs.len(), change_address),
            signed: false,
        })
    }

    async fn sign(
        &self,
        artifact: &TxArtifact,
        signing_key: &str,
    ) -> Result<TxArtifact, SettlementError> {
        let mut state = self.state.lock();
        self.record(&mut state, SettlementStep::Sign)?;
        let index = Self::draft_index(&artifact.handle)?;
        if let Some(draft) = state.drafts.get_mut(index) {
            draft.signing_key = Some(signing_key.to_string());
        }
        Ok(TxArtifact {
            signed: true,
            ..artifact.clone()
        })
    }

    async fn submit(&self, signed: &TxArtifact) -> Result<SubmitReceipt, SettlementError> {
        let mut state = self.state.lock();
        self.record(&mut state, SettlementStep::Submit)?;
        let index = Self::draft_index(&signed.handle)?;
        let draft = state
            .drafts
            .get(index)
            .cloned()
            .ok_or_else(|| SettlementError::InvalidOutput {
                step: SettlementStep::Submit,
                detail: format!("unknown dry-run handle {}", signed.handle),
            })?;
        let id = format!("dryrun_{}", index);
        info!(id = %id, outputs = draft.outputs.len(), "dry-run: recorded transaction");
        state.submissions.push(DryRunSubmission {
            id: id.clone(),
            source: draft.source,
            outputs: draft.outputs,
            change_address: draft.change_address,
            signing_key: draft.signing_key.unwrap_or_default(),
        });
        Ok(SubmitReceipt { output: id })
    }

    async fn fetch_id(&self, signed: &TxArtifact) -> Result<String, SettlementError> {
        let mut state = self.state.lock();
        self.record(&mut state, SettlementStep::TxId)?;
        let index = Self::draft_index(&signed.handle)?;
        Ok(format!("dryrun_{}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::settle;

    #[tokio::test]
    async fn test_records_full_settlement() {
        let tool = DryRunTool::new();
        let outputs = vec![TxOutput::new("addr1a", 30), TxOutput::new("addr1b", 70)];
        let id = settle(&tool, "addr1src", &outputs, "addr1src", "key.skey")
            .await
            .unwrap();

        assert_eq!(id, "dryrun_0");
        let subs = tool.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].outputs, outputs);
        assert_eq!(subs[0].signing_key, "key.skey");
        assert_eq!(
            tool.calls(),
            vec![
                SettlementStep::Build,
                SettlementStep::Sign,
                SettlementStep::Submit,
                SettlementStep::TxId
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_hits_nth_call() {
        let tool = DryRunTool::new().fail_on(SettlementStep::Submit, 1);
        let outputs = vec![TxOutput::new("addr1a", 30)];

        assert!(settle(&tool, "s", &outputs, "s", "k").await.is_ok());
        let err = settle(&tool, "s", &outputs, "s", "k").await.unwrap_err();
        assert_eq!(err.step(), SettlementStep::Submit);
        assert_eq!(tool.submission_count(), 1);
    }
}
