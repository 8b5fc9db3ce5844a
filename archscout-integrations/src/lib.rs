#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Integrations with the services archscout talks to.
//!
//! Each integration sits behind a feature flag, both are enabled by default.

#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "openai")]
pub mod openai;
