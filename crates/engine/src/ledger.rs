//! Guarded session writes.
//!
//! Every write to a session record goes through a [`SessionLedger`]. A commit
//! re-reads the persisted record under the write gate, so a cancellation that
//! lands while an executor holds a stale copy is never overwritten.

use std::sync::Arc;

use dropwell_core::{unix_now, ErrorKind, Session, Stage};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::store::{SessionStore, StoreError};
use crate::{EngineError, Result};

pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
    gate: Mutex<()>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub fn load(&self, id: &str) -> std::result::Result<Session, StoreError> {
        self.store.load(id)
    }

    /// Persisted stage of `id`.
    pub fn stage_of(&self, id: &str) -> std::result::Result<Stage, StoreError> {
        self.store.load(id).map(|s| s.stage)
    }

    /// Persist a brand-new session. Fails if the id is taken.
    pub fn create(&self, session: &Session) -> Result<()> {
        let _gate = self.gate.lock();
        if self.store.exists(&session.session_id)? {
            return Err(StoreError::AlreadyExists(session.session_id.clone()).into());
        }
        self.store.save(session)?;
        info!(session = %session.session_id, stage = %session.stage, "session created");
        Ok(())
    }

    /// Persist the executor's copy of a session.
    ///
    /// The persisted stage must be able to advance to `session.stage` and the
    /// record must pass [`Session::check_invariants`]. If the
    /// record was cancelled in the meantime, the executor's progress (tx ids)
    /// is still written, the stage stays `Cancelled`, and
    /// [`EngineError::Cancelled`] is returned.
    pub fn commit(&self, session: &mut Session) -> Result<()> {
        let _gate = self.gate.lock();
        let persisted = match self.store.load(&session.session_id) {
            Ok(p) => Some(p),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        session.updated_at = unix_now();

        if let Some(persisted) = persisted {
            if persisted.stage == Stage::Cancelled && session.stage != Stage::Cancelled {
                session.stage = Stage::Cancelled;
                session.last_error = persisted.last_error;
                session.last_error_kind = persisted.last_error_kind;
                self.store.save(session)?;
                warn!(session = %session.session_id, "session cancelled while executing");
                return Err(EngineError::Cancelled(session.session_id.clone()));
            }
            if !persisted.stage.can_advance_to(session.stage) {
                return Err(EngineError::InvalidTransition {
                    from: persisted.stage,
                    to: session.stage,
                });
            }
        }
        if let Err(detail) = session.check_invariants() {
            return Err(EngineError::InvariantViolated {
                id: session.session_id.clone(),
                detail,
            });
        }

        self.store.save(session)?;
        debug!(
            session = %session.session_id,
            stage = %session.stage,
            tx_ids = session.distribution_tx_ids.len(),
            "session committed"
        );
        Ok(())
    }

    /// Mark a non-terminal session cancelled.
    pub fn cancel(&self, id: &str, reason: &str) -> Result<Session> {
        let _gate = self.gate.lock();
        let mut session = self.store.load(id)?;
        if session.stage.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: session.stage,
                to: Stage::Cancelled,
            });
        }
        let from = session.stage;
        session.stage = Stage::Cancelled;
        session.record_error(ErrorKind::Cancelled, reason);
        session.updated_at = unix_now();
        self.store.save(&session)?;
        info!(session = %id, %from, reason, "session cancelled");
        Ok(session)
    }

    /// Record `err` on the session and persist it, best effort.
    /// Returns `err` unless the session turned out to be cancelled.
    pub fn fail(&self, session: &mut Session, err: EngineError) -> EngineError {
        session.record_error(err.kind(), err.to_string());
        match self.commit(session) {
            Ok(()) => err,
            Err(cancelled @ EngineError::Cancelled(_)) => cancelled,
            Err(commit_err) => {
                warn!(
                    session = %session.session_id,
                    error = %commit_err,
                    "failed to persist session error"
                );
                err
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use dropwell_core::{PayoutRate, Recipient};

    fn session(stage: Stage) -> Session {
        Session {
            session_id: "owner_1".into(),
            owner_id: "owner".into(),
            created_at: 1,
            updated_at: 1,
            policy_id: None,
            rate: PayoutRate::new(10, 1).unwrap(),
            recipients: vec![Recipient { address: "addr1a".into(), weight: 1 }],
            total_weight: 1,
            total_payout: 10,
            funding_address: "addr1fund".into(),
            signing_key: "key".into(),
            fee_buffer: 0,
            required_amount: 10,
            drain_address: None,
            max_outputs_per_tx: 1,
            stage,
            distribution_tx_ids: vec![],
            unconfirmed_batch: None,
            service_fee_tx_id: None,
            drain_tx_id: None,
            last_error: None,
            last_error_kind: None,
        }
    }

    fn ledger() -> SessionLedger {
        SessionLedger::new(Arc::new(MemorySessionStore::new()))
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let ledger = ledger();
        ledger.create(&session(Stage::AwaitingFunds)).unwrap();
        assert!(matches!(
            ledger.create(&session(Stage::AwaitingFunds)),
            Err(EngineError::Store(StoreError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn test_commit_advances_one_stage() {
        let ledger = ledger();
        let mut s = session(Stage::AwaitingFunds);
        ledger.create(&s).unwrap();

        s.stage = Stage::BuildingTx;
        ledger.commit(&mut s).unwrap();
        assert_eq!(ledger.stage_of("owner_1").unwrap(), Stage::BuildingTx);

        s.stage = Stage::Completed;
        assert!(matches!(
            ledger.commit(&mut s),
            Err(EngineError::InvalidTransition { from: Stage::BuildingTx, to: Stage::Completed })
        ));
    }

    #[test]
    fn test_commit_after_cancel_keeps_cancelled() {
        let ledger = ledger();
        let mut s = session(Stage::BuildingTx);
        ledger.create(&s).unwrap();
        ledger.cancel("owner_1", "owner asked").unwrap();

        s.stage = Stage::Distributing;
        s.distribution_tx_ids.push("tx0".into());
        let err = ledger.commit(&mut s).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));

        let persisted = ledger.load("owner_1").unwrap();
        assert_eq!(persisted.stage, Stage::Cancelled);
        assert_eq!(persisted.distribution_tx_ids, vec!["tx0".to_string()]);
        assert_eq!(persisted.last_error.as_deref(), Some("owner asked"));
        assert_eq!(persisted.last_error_kind, Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_commit_rejects_inconsistent_record() {
        let ledger = ledger();
        let mut s = session(Stage::Distributing);
        ledger.create(&s).unwrap();

        // One recipient at one output per batch: a single batch.
        s.distribution_tx_ids = vec!["tx0".into(), "tx1".into()];
        let err = ledger.commit(&mut s).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolated { .. }));
        assert_eq!(err.kind(), ErrorKind::CorruptState);
        assert!(ledger.load("owner_1").unwrap().distribution_tx_ids.is_empty());

        s.distribution_tx_ids = vec!["tx0".into()];
        ledger.commit(&mut s).unwrap();
        assert_eq!(ledger.load("owner_1").unwrap().distribution_tx_ids, vec!["tx0".to_string()]);
    }

    #[test]
    fn test_cancel_terminal_rejected() {
        let ledger = ledger();
        ledger.create(&session(Stage::Completed)).unwrap();
        assert!(matches!(
            ledger.cancel("owner_1", "too late"),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_fail_records_error() {
        let ledger = ledger();
        let mut s = session(Stage::PayingFee);
        ledger.create(&s).unwrap();
        let err = ledger.fail(&mut s, EngineError::InsufficientForFee { have: 1, need: 2 });
        assert!(matches!(err, EngineError::InsufficientForFee { .. }));
        let persisted = ledger.load("owner_1").unwrap();
        assert_eq!(persisted.last_error_kind, Some(ErrorKind::InsufficientFunds));
        assert!(persisted.last_error.unwrap().contains("have 1"));
    }
}
