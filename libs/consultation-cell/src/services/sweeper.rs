// libs/consultation-cell/src/services/sweeper.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use shared_config::AppConfig;
use shared_database::store::StoreClient;

use crate::models::{Consultation, ConsultationError, ConsultationStatus, SweepReport, TransitionEvent};
use crate::repository::ConsultationRepository;
use crate::services::lifecycle::ConsultationLifecycleService;
use crate::services::state::TransitionActor;

/// Periodic pass over all open consultations. Pending requests whose session
/// start has passed are expired with a full refund; confirmed sessions whose
/// end has passed are finished with the payout and a room-provision event.
pub struct LifecycleSweeper {
    consultations: ConsultationRepository,
    lifecycle: ConsultationLifecycleService,
    interval_seconds: u64,
    is_shutdown: tokio::sync::RwLock<bool>,
}

impl LifecycleSweeper {
    pub fn new(config: &AppConfig) -> Self {
        let store = Arc::new(StoreClient::new(config));

        Self {
            consultations: ConsultationRepository::new(Arc::clone(&store)),
            lifecycle: ConsultationLifecycleService::new(config, store),
            interval_seconds: config.sweep_interval_seconds,
            is_shutdown: tokio::sync::RwLock::new(false),
        }
    }

    /// Tick loop, spawned from process startup. The first pass runs right
    /// away so a restart catches up on anything that came due while down.
    pub async fn run(&self) {
        info!(
            "Lifecycle sweeper started, interval {}s",
            self.interval_seconds
        );

        let mut ticker =
            tokio::time::interval(tokio::time::Duration::from_secs(self.interval_seconds));

        loop {
            ticker.tick().await;

            if *self.is_shutdown.read().await {
                info!("Lifecycle sweeper stopped");
                break;
            }

            match self.run_once(Utc::now()).await {
                Ok(report) if report.scanned > 0 => {
                    info!(
                        "Sweep pass: {} scanned, {} finished, {} expired, {} failed",
                        report.scanned, report.finished, report.expired, report.failed
                    );
                }
                Ok(_) => debug!("Sweep pass: nothing open"),
                Err(e) => error!("Sweep pass failed: {}", e),
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
    }

    /// One pass over the open consultations at the given instant. `now` is
    /// an argument so tests can sweep any moment they like.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, ConsultationError> {
        let open = self.consultations.open_consultations().await?;

        let mut report = SweepReport {
            scanned: open.len(),
            finished: 0,
            expired: 0,
            failed: 0,
        };

        for consultation in &open {
            match self.sweep_record(consultation, now).await {
                Ok(Some(ConsultationStatus::Finished)) => report.finished += 1,
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => {}
                Err(ConsultationError::IllegalTransition { from, .. }) => {
                    // A user-driven transition won the race; the record is
                    // already where it belongs.
                    debug!(
                        "Sweep of consultation {} lost to a concurrent move to {}",
                        consultation.id, from
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Sweep of consultation {} failed: {}", consultation.id, e);
                }
            }
        }

        Ok(report)
    }

    /// Apply the sweep transition to one record if it is due. Returns the
    /// status it moved to, or `None` when the record is not due yet.
    async fn sweep_record(
        &self,
        consultation: &Consultation,
        now: DateTime<Utc>,
    ) -> Result<Option<ConsultationStatus>, ConsultationError> {
        let due = match consultation.status {
            // The doctor never answered before the session would have begun
            ConsultationStatus::Pending => consultation
                .starts_at()
                .map(|start| start <= now)
                .unwrap_or(false),
            // The session is over; settle it
            ConsultationStatus::Confirmed => consultation
                .ends_at()
                .map(|end| end <= now)
                .unwrap_or(false),
            _ => false,
        };

        if !due {
            return Ok(None);
        }

        let updated = self
            .lifecycle
            .apply_transition(consultation, TransitionEvent::SweepDue, &TransitionActor::Sweeper)
            .await?;

        Ok(Some(updated.status))
    }
}
