//! Data side of the rain display: measurement feeds, payload normalization
//! and the bounded token buffers a renderer pulls from.

pub mod debug_hooks;
pub mod error;
pub mod feed;
pub mod normalize;
pub mod persist;
pub mod rain;
pub mod settings;
pub mod tokens;
