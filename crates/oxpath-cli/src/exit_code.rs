//! Process exit codes.

/// Everything resolved.
pub const SUCCESS: u8 = 0;

/// Any failure without a more specific code (bad flags, invalid config).
pub const GENERAL_ERROR: u8 = 1;

/// At least one path does not exist.
pub const NOT_FOUND: u8 = 2;

/// The resolver was overloaded, timed out or shutting down.
pub const UNAVAILABLE: u8 = 3;

/// An existence check failed (permissions, I/O).
pub const ACCESS_DENIED: u8 = 4;
