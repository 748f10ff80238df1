//! Data models for Tally

mod category;
mod entry;
mod id;
mod ledger;

pub use category::Category;
pub use entry::{Entry, PaymentMode};
pub use id::{RecordId, ReplicaId};
pub use ledger::Ledger;
