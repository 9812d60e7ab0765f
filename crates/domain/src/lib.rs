//! Data model shared by every chainwatch crate.
//!
//! Contract bindings, event records, confirmation records and the small
//! value types the listener passes between its components.

pub mod binding;
pub mod confirmation;
pub mod connection;
pub mod error;
pub mod events;
pub mod network;
pub mod units;

pub use binding::{ContractBinding, InterfaceDescriptor, normalize_address};
pub use confirmation::{CommitPlan, ConfirmationRecord, ReceiptStatus, ResolutionSource};
pub use connection::ConnectionState;
pub use error::DomainError;
pub use events::{EventKind, EventRecord, EventValue};
pub use network::Network;
pub use units::format_units;
