//! # fm-tests
//!
//! Cross-crate scenario tests that drive the protocol stack the way a
//! deployed pair of engines would: two channel stores (or two full
//! orchestrators) exchanging real signed commitments, with the chain
//! represented by injected events.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! └── src/
//!     ├── lib.rs            # This file
//!     ├── fixtures.rs       # Keys, channels, setup-round builders
//!     ├── consensus_flow.rs # ConsensusApp vote rounds over the validator
//!     ├── funding_flow.rs   # Deposit safety and guarantor claims
//!     └── engine_flow.rs    # Two orchestrators, open to conclusion
//! ```

pub mod fixtures;

#[cfg(test)]
mod consensus_flow;
#[cfg(test)]
mod engine_flow;
#[cfg(test)]
mod funding_flow;
