//! Top-level facade crate for tally.
//!
//! Re-exports the aggregation core and the agent library so users can depend on a single crate.

pub mod core {
    pub use tally_core::*;
}

pub mod agent {
    pub use tally_agent::*;
}
