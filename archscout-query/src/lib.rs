//! Retrieval over the embedded project texts and design proposals built on top of it.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod prompts;
pub mod proposal;
pub mod retriever;

pub use proposal::{Proposal, ProposalGenerator};
pub use retriever::Retriever;
