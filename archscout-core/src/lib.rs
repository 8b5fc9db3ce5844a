#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod errors;
mod invalid_ids;
mod layout;
mod outcome;
mod project;
mod record;
mod settings;
mod success_log;
pub mod chunk;
pub mod progress;
pub mod traits;
pub mod type_aliases;

pub use type_aliases::*;

/// All traits are available from the root
pub use crate::traits::*;

pub use crate::errors::*;
pub use crate::invalid_ids::{InvalidIds, saving_gap};
pub use crate::layout::{GALLERY_DIR, ProjectLayout, RECORD_FILE, Source};
pub use crate::outcome::*;
pub use crate::project::ProjectId;
pub use crate::record::*;
pub use crate::settings::*;
pub use crate::success_log::SuccessLog;

/// Re-export of commonly used dependencies.
pub mod prelude;

pub mod util;
