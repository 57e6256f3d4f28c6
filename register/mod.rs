//! The registration engine: settings, per-subject state, property
//! resampling, the entropy objective, minimizers and the driver that ties
//! them together, plus the rigid landmark pre-alignment.

pub mod config;
pub mod driver;
pub mod entropy;
pub mod optimizer;
pub mod resample;
pub mod rigid;
pub mod subject;
