// libs/consultation-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::store::StoreClient;

use crate::models::{Consultation, ConsultationError, TransitionEvent};
use crate::repository::{AccountRepository, ConsultationRepository};
use crate::services::notify::NotifyClient;
use crate::services::settlement::SettlementSplit;
use crate::services::state::{ConsultationStateMachine, TransitionActor};

const SETTLEMENT_RETRY_ATTEMPTS: u32 = 3;

/// Drives a consultation from one status to the next and carries out what
/// the transition implies. Every path into a status change, user request or
/// sweep, goes through `apply_transition`, so the conditional status write
/// is the single point where a transition is won or lost.
#[derive(Clone)]
pub struct ConsultationLifecycleService {
    consultations: ConsultationRepository,
    accounts: AccountRepository,
    notify: NotifyClient,
    state_machine: ConsultationStateMachine,
    notify_configured: bool,
}

impl ConsultationLifecycleService {
    pub fn new(config: &AppConfig, store: Arc<StoreClient>) -> Self {
        Self {
            consultations: ConsultationRepository::new(Arc::clone(&store)),
            accounts: AccountRepository::new(store),
            notify: NotifyClient::new(config),
            state_machine: ConsultationStateMachine::new(),
            notify_configured: config.is_notify_configured(),
        }
    }

    /// Load a consultation and apply one transition event to it.
    pub async fn apply_event(
        &self,
        consultation_id: Uuid,
        event: TransitionEvent,
        actor: &TransitionActor,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.consultations.find(consultation_id).await?;
        self.apply_transition(&consultation, event, actor).await
    }

    /// Plan, commit, and settle one transition on an already-loaded record.
    pub async fn apply_transition(
        &self,
        consultation: &Consultation,
        event: TransitionEvent,
        actor: &TransitionActor,
    ) -> Result<Consultation, ConsultationError> {
        // **Step 1: Plan the transition (authorization + state table)**
        let plan = self.state_machine.plan_transition(consultation, event, actor)?;

        // **Step 2: Commit the status conditionally on the status we read**
        let update = json!({
            "status": plan.next_status,
            "refund_amount": plan.split.patient_refund,
            "payout_amount": plan.split.doctor_payout,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let updated = match self
            .consultations
            .cas_update_status(consultation.id, consultation.status, update)
            .await?
        {
            Some(row) => row,
            None => {
                // A concurrent transition moved the row first. Re-read so
                // the error names the status that actually won.
                let current = self.consultations.find(consultation.id).await?;
                warn!(
                    "Consultation {} transitioned to {} while {} was being applied",
                    consultation.id, current.status, event
                );
                return Err(ConsultationError::IllegalTransition {
                    from: current.status,
                    event,
                });
            }
        };

        // **Step 3: Post-commit effects. The status write above is the
        // exactly-once guard; failures from here on are logged for
        // reconciliation, never unwound.**
        if updated.status.is_terminal() {
            if let Err(e) = self.consultations.release_claims(updated.id).await {
                warn!(
                    "Slot release for consultation {} failed: {}",
                    updated.id, e
                );
            }
        }

        self.apply_settlement(&updated, &plan.split).await;

        if plan.provision_room {
            self.provision_room(&updated).await;
        }

        info!(
            "Consultation {} moved {} -> {} via {}",
            updated.id, consultation.status, updated.status, event
        );

        Ok(updated)
    }

    /// Move the planned amounts onto the wallets. Each leg retries briefly;
    /// a leg that still fails is logged loudly and left to reconciliation.
    async fn apply_settlement(&self, consultation: &Consultation, split: &SettlementSplit) {
        if split.is_zero() {
            return;
        }

        if split.patient_refund > 0 {
            let mut outcome = Ok(0);
            for attempt in 1..=SETTLEMENT_RETRY_ATTEMPTS {
                outcome = self
                    .accounts
                    .credit_patient_wallet(consultation.patient_id, split.patient_refund)
                    .await;
                if outcome.is_ok() {
                    break;
                }
                warn!(
                    "Refund credit for consultation {} failed, attempt {}/{}",
                    consultation.id, attempt, SETTLEMENT_RETRY_ATTEMPTS
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64)).await;
            }
            if let Err(e) = outcome {
                error!(
                    "Refund of {} to patient {} for consultation {} was not applied: {}",
                    split.patient_refund, consultation.patient_id, consultation.id, e
                );
            }
        }

        if split.doctor_payout > 0 {
            let mut outcome = Ok(0);
            for attempt in 1..=SETTLEMENT_RETRY_ATTEMPTS {
                outcome = self
                    .accounts
                    .credit_doctor_wallet(consultation.doctor_id, split.doctor_payout)
                    .await;
                if outcome.is_ok() {
                    break;
                }
                warn!(
                    "Payout credit for consultation {} failed, attempt {}/{}",
                    consultation.id, attempt, SETTLEMENT_RETRY_ATTEMPTS
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64)).await;
            }
            if let Err(e) = outcome {
                error!(
                    "Payout of {} to doctor {} for consultation {} was not applied: {}",
                    split.doctor_payout, consultation.doctor_id, consultation.id, e
                );
            }
        }
    }

    async fn provision_room(&self, consultation: &Consultation) {
        if !self.notify_configured {
            warn!(
                "Notify service not configured, skipping room provision for consultation {}",
                consultation.id
            );
            return;
        }

        if let Err(e) = self.notify.room_provision(consultation).await {
            error!(
                "Room provision for consultation {} failed: {}",
                consultation.id, e
            );
        }
    }
}
