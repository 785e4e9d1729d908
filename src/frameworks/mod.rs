// Frameworks: environment config and the process runtime for the session client binary.

pub mod config;
pub mod runtime;
