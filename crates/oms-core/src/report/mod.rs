//! Inbound telegram reports as relayed by field gateways.
//!
//! Reports arrive as JSON objects (one per line on the ingest stream). They
//! are validated here, before the ingestion pipeline ever sees them; an
//! invalid report is rejected and never recorded as a telegram.

mod parser;
mod types;

pub use parser::{parse_report_line, parse_report_value};
pub use types::*;
