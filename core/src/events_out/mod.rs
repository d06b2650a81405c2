pub mod writer;

pub use crate::config::EventsOutConfig;
pub use writer::{start_events_out, EventsOutTx};
