//! Tickets module
//!
//! Ticket lifecycle, check-in and attendance reads.

mod store;

pub use store::{CheckInOutcome, EventStats, RecentCheckIn, Ticket, TicketStore};
