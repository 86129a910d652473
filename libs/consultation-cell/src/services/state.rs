use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Consultation, ConsultationError, ConsultationStatus, TransitionEvent};
use crate::services::settlement::{self, SettlementSplit};

/// Who is driving a transition. The sweeper is internal and bypasses
/// participant checks; patients and doctors must match the consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    Patient(Uuid),
    Doctor(Uuid),
    Sweeper,
}

/// Everything a transition implies, decided before anything is written:
/// the next status, the money consequence, and whether a room has to be
/// provisioned afterwards.
#[derive(Debug, Clone, Copy)]
pub struct TransitionPlan {
    pub next_status: ConsultationStatus,
    pub split: SettlementSplit,
    pub provision_room: bool,
}

#[derive(Clone)]
pub struct ConsultationStateMachine;

impl ConsultationStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Plan a transition, or refuse it. An actor who is not a participant
    /// is rejected before the state is even considered; a participant
    /// driving an event the current status does not accept gets an illegal
    /// transition error, never a silent no-op.
    pub fn plan_transition(
        &self,
        consultation: &Consultation,
        event: TransitionEvent,
        actor: &TransitionActor,
    ) -> Result<TransitionPlan, ConsultationError> {
        debug!(
            "Planning {} on consultation {} in status {}",
            event, consultation.id, consultation.status
        );

        self.authorize(consultation, event, actor)?;

        let plan = match (consultation.status, event) {
            (ConsultationStatus::Pending, TransitionEvent::Confirm) => TransitionPlan {
                next_status: ConsultationStatus::Confirmed,
                split: SettlementSplit::none(),
                provision_room: false,
            },
            (ConsultationStatus::Pending, TransitionEvent::Deny) => TransitionPlan {
                next_status: ConsultationStatus::Denied,
                split: settlement::full_refund(consultation.price),
                provision_room: false,
            },
            (ConsultationStatus::Pending, TransitionEvent::Cancel) => TransitionPlan {
                next_status: ConsultationStatus::Canceled,
                split: settlement::full_refund(consultation.price),
                provision_room: false,
            },
            (ConsultationStatus::Pending, TransitionEvent::SweepDue) => TransitionPlan {
                next_status: ConsultationStatus::Canceled,
                split: settlement::full_refund(consultation.price),
                provision_room: false,
            },
            (ConsultationStatus::Confirmed, TransitionEvent::Cancel) => TransitionPlan {
                next_status: ConsultationStatus::Canceled,
                split: settlement::confirmed_cancellation_split(consultation.price),
                provision_room: false,
            },
            (ConsultationStatus::Confirmed, TransitionEvent::SweepDue) => TransitionPlan {
                next_status: ConsultationStatus::Finished,
                split: settlement::full_payout(consultation.price),
                provision_room: true,
            },
            (from, event) => {
                warn!(
                    "Rejected {} on consultation {} in status {} (valid events: {:?})",
                    event,
                    consultation.id,
                    from,
                    self.valid_events(&from)
                );
                return Err(ConsultationError::IllegalTransition { from, event });
            }
        };

        Ok(plan)
    }

    /// All events a status accepts, actor checks aside.
    pub fn valid_events(&self, status: &ConsultationStatus) -> Vec<TransitionEvent> {
        match status {
            ConsultationStatus::Pending => vec![
                TransitionEvent::Confirm,
                TransitionEvent::Deny,
                TransitionEvent::Cancel,
                TransitionEvent::SweepDue,
            ],
            ConsultationStatus::Confirmed => {
                vec![TransitionEvent::Cancel, TransitionEvent::SweepDue]
            }
            // Terminal states accept nothing
            ConsultationStatus::Finished
            | ConsultationStatus::Canceled
            | ConsultationStatus::Denied => vec![],
        }
    }

    fn authorize(
        &self,
        consultation: &Consultation,
        event: TransitionEvent,
        actor: &TransitionActor,
    ) -> Result<(), ConsultationError> {
        let allowed = match (event, actor) {
            (TransitionEvent::Confirm | TransitionEvent::Deny, TransitionActor::Doctor(id)) => {
                *id == consultation.doctor_id
            }
            (TransitionEvent::Cancel, TransitionActor::Patient(id)) => {
                *id == consultation.patient_id
            }
            (TransitionEvent::SweepDue, TransitionActor::Sweeper) => true,
            _ => false,
        };

        if !allowed {
            warn!(
                "Unauthorized {} on consultation {} by {:?}",
                event, consultation.id, actor
            );
            return Err(ConsultationError::Unauthorized);
        }

        Ok(())
    }
}

impl Default for ConsultationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
