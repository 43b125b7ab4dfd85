pub mod diff;
pub mod item_identity;
#[allow(clippy::module_inception)]
pub mod merge;
pub mod rank;
