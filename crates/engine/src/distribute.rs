//! Batch settlement: splits the payouts into transactions of bounded size and
//! submits them one after another, persisting each id as soon as it exists.

use dropwell_core::{Session, Stage};
use dropwell_settlement::{
    format_ada, partition, settle, total_amount, SettlementStep, SettlementTool, TxOutput,
};
use tracing::{error, info};

use crate::ledger::SessionLedger;
use crate::{EngineError, Result};

/// Submit every payout batch, in order.
///
/// The session is persisted as `Distributing` before the first batch is built.
/// Each batch is marked unconfirmed before it goes to the tool and the mark is
/// replaced by its id once it is known. On the first failure the error is
/// recorded and returned; later batches are not attempted, and a batch that
/// failed at submit or id lookup stays unconfirmed. A session that may have
/// broadcast anything is never redistributed: it needs an operator to check
/// which transactions reached the chain.
pub async fn distribute(
    ledger: &SessionLedger,
    session: &mut Session,
    tool: &dyn SettlementTool,
    max_outputs_per_tx: usize,
) -> Result<Vec<String>> {
    match session.stage {
        Stage::BuildingTx => {
            session.stage = Stage::Distributing;
            ledger.commit(session)?;
        }
        Stage::Distributing if !session.may_have_broadcast() => {}
        Stage::Distributing => {
            let total = session.batch_count(max_outputs_per_tx);
            let reason = match session.unconfirmed_batch {
                Some(batch) => format!(
                    "batch {} of {} may have been broadcast; {} id(s) recorded",
                    batch + 1,
                    total,
                    session.distribution_tx_ids.len()
                ),
                None => format!(
                    "{} of {} batches already submitted",
                    session.distribution_tx_ids.len(),
                    total
                ),
            };
            let err = EngineError::ManualInterventionRequired {
                id: session.session_id.clone(),
                reason,
            };
            return Err(ledger.fail(session, err));
        }
        other => {
            return Err(EngineError::InvalidTransition {
                from: other,
                to: Stage::Distributing,
            })
        }
    }
    if max_outputs_per_tx == 0 {
        return Err(EngineError::InvalidConfig(
            "max outputs per transaction must be positive".to_string(),
        ));
    }

    let outputs: Vec<TxOutput> = session
        .payouts()
        .map(|(address, amount)| TxOutput::new(address, amount))
        .collect();
    let batches = partition(&outputs, max_outputs_per_tx);
    let total = batches.len();

    info!(
        session = %session.session_id,
        recipients = outputs.len(),
        batches = total,
        amount = %format_ada(total_amount(&outputs)),
        "starting distribution"
    );

    for (index, batch) in batches.iter().enumerate() {
        session.unconfirmed_batch = Some(index);
        ledger.commit(session)?;

        let result = settle(
            tool,
            &session.funding_address,
            batch,
            &session.funding_address,
            &session.signing_key,
        )
        .await;

        match result {
            Ok(tx_id) => {
                session.distribution_tx_ids.push(tx_id.clone());
                session.unconfirmed_batch = None;
                info!(
                    session = %session.session_id,
                    batch = index + 1,
                    of = total,
                    outputs = batch.len(),
                    tx = %tx_id,
                    "batch submitted"
                );
                if let Err(e) = ledger.commit(session) {
                    error!(
                        session = %session.session_id,
                        tx = %tx_id,
                        error = %e,
                        "batch submitted but its id could not be persisted"
                    );
                    return Err(e);
                }
            }
            Err(source) => {
                error!(
                    session = %session.session_id,
                    batch = index + 1,
                    of = total,
                    step = %source.step(),
                    error = %source,
                    "batch settlement failed"
                );
                // Nothing reaches the chain before submit.
                if matches!(source.step(), SettlementStep::Build | SettlementStep::Sign) {
                    session.unconfirmed_batch = None;
                }
                let err = EngineError::Batch {
                    batch: index,
                    total,
                    source,
                };
                return Err(ledger.fail(session, err));
            }
        }
    }

    session.stage = Stage::PayingFee;
    session.last_error = None;
    session.last_error_kind = None;
    ledger.commit(session)?;
    info!(session = %session.session_id, batches = total, "distribution complete");
    Ok(session.distribution_tx_ids.clone())
}
