//! Service fee and drain: after distribution, pays the flat service fee,
//! returns the remainder to the drain address, and sweeps any late dust.

use std::time::Duration;

use dropwell_core::{Lovelace, Session, Stage};
use dropwell_settlement::{format_ada, settle, BalanceQuery, SettlementTool, TxOutput};
use tracing::{info, warn};

use crate::ledger::SessionLedger;
use crate::{EngineError, Result};

/// Where the fee goes and how long to wait before the final sweep.
#[derive(Debug, Clone)]
pub struct FeePlan<'a> {
    pub fee_amount: Lovelace,
    pub fee_destination: &'a str,
    pub settle_delay: Duration,
}

/// Collect the service fee and complete the session.
///
/// - An empty funding address completes without any transaction.
/// - A balance below the fee fails with `InsufficientForFee`.
/// - Otherwise the fee goes to `fee_destination` and all change to the
///   session's drain address, defaulting to `fee_destination`.
///
/// A fee id already on the record means the fee was paid by an earlier run
/// and is never paid twice.
pub async fn settle_fee(
    ledger: &SessionLedger,
    session: &mut Session,
    balance: &dyn BalanceQuery,
    tool: &dyn SettlementTool,
    plan: &FeePlan<'_>,
) -> Result<()> {
    if session.stage != Stage::PayingFee {
        return Err(EngineError::InvalidTransition {
            from: session.stage,
            to: Stage::Completed,
        });
    }
    let drain_address = session.drain_address_or(plan.fee_destination).to_string();

    if session.service_fee_tx_id.is_none() {
        let have = match balance.balance(&session.funding_address).await {
            Ok(have) => have,
            Err(e) => return Err(ledger.fail(session, e.into())),
        };

        if have == 0 {
            info!(session = %session.session_id, "funding address empty, no service fee collected");
            return complete(ledger, session);
        }
        if have < plan.fee_amount {
            let err = EngineError::InsufficientForFee {
                have,
                need: plan.fee_amount,
            };
            warn!(session = %session.session_id, error = %err, "cannot pay service fee");
            return Err(ledger.fail(session, err));
        }

        let outputs = [TxOutput::new(plan.fee_destination, plan.fee_amount)];
        let tx_id = match settle(
            tool,
            &session.funding_address,
            &outputs,
            &drain_address,
            &session.signing_key,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => return Err(ledger.fail(session, EngineError::FeeSettlement(e))),
        };
        info!(
            session = %session.session_id,
            fee = %format_ada(plan.fee_amount),
            change = %format_ada(have - plan.fee_amount),
            drain = %drain_address,
            tx = %tx_id,
            "service fee paid"
        );
        session.service_fee_tx_id = Some(tx_id);
        ledger.commit(session)?;
    } else {
        info!(session = %session.session_id, "service fee already paid, skipping");
    }

    if session.drain_tx_id.is_none() {
        sweep_dust(session, balance, tool, plan).await;
    }
    complete(ledger, session)
}

/// Best-effort change-only sweep of anything that reached the funding address
/// after the fee transaction. Failures are logged, never returned.
async fn sweep_dust(
    session: &mut Session,
    balance: &dyn BalanceQuery,
    tool: &dyn SettlementTool,
    plan: &FeePlan<'_>,
) {
    tokio::time::sleep(plan.settle_delay).await;

    let left = match balance.balance(&session.funding_address).await {
        Ok(left) => left,
        Err(e) => {
            warn!(session = %session.session_id, error = %e, "could not check remaining balance");
            return;
        }
    };
    if left == 0 {
        return;
    }

    match settle(
        tool,
        &session.funding_address,
        &[],
        plan.fee_destination,
        &session.signing_key,
    )
    .await
    {
        Ok(tx_id) => {
            info!(
                session = %session.session_id,
                amount = %format_ada(left),
                tx = %tx_id,
                "drained remaining balance"
            );
            session.drain_tx_id = Some(tx_id);
        }
        Err(e) => {
            warn!(
                session = %session.session_id,
                amount = left,
                error = %e,
                "failed to drain remaining balance"
            );
        }
    }
}

fn complete(ledger: &SessionLedger, session: &mut Session) -> Result<()> {
    session.stage = Stage::Completed;
    ledger.commit(session)?;
    info!(session = %session.session_id, "airdrop completed");
    Ok(())
}
