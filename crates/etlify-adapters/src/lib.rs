//! Reference wire protocols for the `etlify_core::Adapter` contract
//! (spec.md §4.3): HubSpot v3 and Airtable v0, built on `reqwest` since
//! every call site in this workspace is async.

mod airtable;
mod hubspot;
mod http;

pub use airtable::AirtableAdapter;
pub use hubspot::HubSpotAdapter;
