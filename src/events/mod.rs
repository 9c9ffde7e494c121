//! Event registration domain: admission control, cancellation and tickets

pub mod model;
pub mod service;
pub mod ticket;

pub use model::{
    Event, EventStatus, EventSummary, MyRegistrationResponse, RegisterRequest, Registration,
    RegistrationResponse, RegistrationStatus, RegistrationStatusResponse, TicketVerification,
};
pub use service::{AdmissionError, RegistrationService};
pub use ticket::TicketError;
