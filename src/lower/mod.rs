//! Target-to-build-graph lowering

pub mod expand;
pub mod loader;
pub mod lowerer;
pub mod node;
pub mod singleflight;

pub use loader::{FsRecipeLoader, RecipeLoader};
pub use lowerer::{LowerError, LowerOptions, Lowerer};
pub use node::{BuildNode, CacheClass, Effect, Fingerprinter, Output};
