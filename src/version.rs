// Package identity reported by GET /version, taken from Cargo metadata at build time.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NAME: &str = env!("CARGO_PKG_NAME");
