//! # Contracts
//!
//! Frozen interface contracts shared by every acquisition crate: the capture
//! request ("control set"), per-backend camera descriptors, resolved geometry
//! and timing, reference kinds, the capability traits the core drives, and
//! the error taxonomy.
//!
//! All business crates depend on this crate only; reverse dependencies are
//! prohibited.
//!
//! ## Units
//! - Geometry is expressed in unbinned sensor pixels, `right`/`bottom` exclusive
//! - Exposure and settle times on requests are seconds (`f64`)
//! - Everything in a [`TimingPlan`] is milliseconds relative to the start of
//!   the acquisition call

mod actions;
mod backend;
mod collaborators;
mod config;
mod descriptor;
mod error;
mod geometry;
mod image;
mod phase;
mod profile;
mod request;
mod timing;

pub use actions::*;
pub use backend::*;
pub use collaborators::*;
pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use geometry::*;
pub use image::*;
pub use phase::Phase;
pub use profile::*;
pub use request::*;
pub use timing::*;
