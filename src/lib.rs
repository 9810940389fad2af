//! Campus token ledger reconciliation engine.
//!
//! Reads the campus token contract's event log from a ledger node, decodes it into domain
//! events and delivers each event exactly once, in effect, to the off-chain balance store. A
//! durable checkpoint records the highest block whose events were all delivered.

pub mod config;
pub mod ledger;
pub mod notify;
pub mod reconcile;
pub mod shutdown;
pub mod utils;
