//! Settings come from a TOML file picked by `--settings` (or the build's
//! default), with `GATEKEEPER__*` environment overrides on top.
//! See `bin/settings_demo.rs` for a binary that prints what gets loaded.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
