//! Terminal and machine-readable rendering of plans and reports.

pub mod json;
pub mod table;
