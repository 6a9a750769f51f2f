//! Data models for Oddswatch

mod alert;
mod observation;
mod source;

pub use alert::*;
pub use observation::*;
pub use source::*;
