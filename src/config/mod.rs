//! Configuration module for hpltune
//!
//! CLI arguments, the JSON config file and the tuning defaults.

mod settings;

pub use settings::*;
