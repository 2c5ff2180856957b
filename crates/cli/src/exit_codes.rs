//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract — scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | run              | Pipeline run codes                       |
//! | 10-19   | diff             | Snapshot diff codes                      |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
#[allow(dead_code)]
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Pipeline run (3-9)
// =============================================================================

/// Config failed to parse or validate.
pub const EXIT_RUN_INVALID_CONFIG: u8 = 3;

/// Runtime failure (unreadable input, serialization error).
pub const EXIT_RUN_RUNTIME: u8 = 4;

/// The base source could not be fetched; nothing to link against.
pub const EXIT_RUN_BASE_SOURCE: u8 = 5;

// =============================================================================
// Snapshot diff (10-19)
// =============================================================================

/// Parse error reading a snapshot file.
pub const EXIT_DIFF_PARSE: u8 = 10;

/// Diff found changes and --strict-exit is set.
/// Like `diff(1)`, "snapshots differ" gets its own code for scripting.
pub const EXIT_DIFF_CHANGES: u8 = 11;
