pub mod availability;
pub mod booking;
pub mod lifecycle;
pub mod notify;
pub mod schedule;
pub mod settlement;
pub mod state;
pub mod sweeper;

pub use availability::AvailabilityService;
pub use booking::ConsultationBookingService;
pub use lifecycle::ConsultationLifecycleService;
pub use sweeper::LifecycleSweeper;
