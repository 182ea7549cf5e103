pub mod ack;
pub mod common;
pub mod completions;
pub mod conflicts;
pub mod export;
pub mod pending;
pub mod prune;
pub mod record;
pub mod simulate;
pub mod status;
