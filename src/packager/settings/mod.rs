//! Configuration types for packaging runs.
//!
//! [`PackageOptions`] is the validated configuration snapshot, and [`Target`]
//! is the closed set of output platforms.

mod options;
mod target;

pub use options::{
    AppSettings, AppearanceSettings, CloudVariables, LoadingScreenSettings, OptimizeSettings,
    PackageOptions, RuntimeSettings, parse_hex_color,
};
pub use target::{Os, RuntimeFamily, Target};
