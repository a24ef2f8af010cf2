//! Backends shipped with the dispatch core.

pub mod dummy;
pub use dummy::{DummyConfigManager, DummyPlugin, DUMMY_ATTRIBUTE};
