pub mod category;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod entry;
pub mod ledger;
pub mod status;
pub mod sync;
