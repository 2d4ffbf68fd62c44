pub mod cli;
pub mod config;
pub mod domain;
pub mod lower;
pub mod syntax;
pub mod util;

pub use config::{ConfigError, KilnConfig};
pub use domain::{GitLookup, Origin, RefError, Reference};
pub use lower::{BuildNode, FsRecipeLoader, LowerError, LowerOptions, Lowerer, RecipeLoader};
pub use syntax::{parse, Lexer, ParseErrors, Recipe};

pub fn init_default() {
    util::logging::init_default();
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
