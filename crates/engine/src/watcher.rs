//! Deposit watcher: polls the funding address until the required amount has
//! arrived, then moves the session to `BuildingTx`.

use std::time::Duration;

use dropwell_core::{ErrorKind, Lovelace, Session, Stage};
use dropwell_settlement::{format_ada, BalanceQuery};
use tracing::{debug, info, warn};

use crate::ledger::SessionLedger;
use crate::store::StoreError;
use crate::{EngineError, Result};

/// Block until the funding address holds at least `required_amount`.
///
/// Has no timeout: a session waits until it is funded or cancelled. Balance
/// query failures are recorded on the session and retried on the next poll.
/// Returns the observed balance.
pub async fn await_deposit(
    ledger: &SessionLedger,
    session: &mut Session,
    balance: &dyn BalanceQuery,
    poll_interval: Duration,
) -> Result<Lovelace> {
    if session.stage != Stage::AwaitingFunds {
        return Err(EngineError::InvalidTransition {
            from: session.stage,
            to: Stage::BuildingTx,
        });
    }

    info!(
        session = %session.session_id,
        address = %session.funding_address,
        required = %format_ada(session.required_amount),
        poll_secs = poll_interval.as_secs_f64(),
        "watching for deposit"
    );

    let mut polls: u64 = 0;
    loop {
        tokio::time::sleep(poll_interval).await;
        polls += 1;

        match ledger.stage_of(&session.session_id) {
            Ok(Stage::Cancelled) => {
                info!(session = %session.session_id, "stopped watching cancelled session");
                return Err(EngineError::Cancelled(session.session_id.clone()));
            }
            Ok(_) => {}
            Err(StoreError::Io(e)) => {
                warn!(session = %session.session_id, error = %e, "session store unavailable, retrying");
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        match balance.balance(&session.funding_address).await {
            Ok(have) if have >= session.required_amount => {
                info!(
                    session = %session.session_id,
                    balance = %format_ada(have),
                    polls,
                    "deposit confirmed"
                );
                session.stage = Stage::BuildingTx;
                session.last_error = None;
                session.last_error_kind = None;
                ledger.commit(session)?;
                return Ok(have);
            }
            Ok(have) => {
                debug!(
                    session = %session.session_id,
                    balance = have,
                    required = session.required_amount,
                    "deposit not yet sufficient"
                );
            }
            Err(e) => {
                warn!(session = %session.session_id, error = %e, "balance query failed, retrying");
                session.record_error(ErrorKind::TransientInfrastructure, format!("balance check: {}", e));
                match ledger.commit(session) {
                    Ok(()) => {}
                    Err(cancelled @ EngineError::Cancelled(_)) => return Err(cancelled),
                    Err(commit_err) => {
                        warn!(session = %session.session_id, error = %commit_err, "failed to record balance error");
                    }
                }
            }
        }
    }
}
