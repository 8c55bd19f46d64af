//! Exit codes shared between the CLI and its workers.
//!
//! These codes are part of the CLI contract and must remain stable; the
//! desktop app maps them to run status and user-facing messages.

/// Success.
pub const SUCCESS: i32 = 0;
/// Training/runtime error (model failed, exception during training).
pub const FAILED: i32 = 1;
/// Invalid request.json (schema/validation error).
pub const INVALID_REQUEST: i32 = 2;
/// Missing files (request.json missing, dataset not found, etc.).
pub const MISSING_FILES: i32 = 3;
/// Internal/tooling error (unexpected CLI bug).
pub const INTERNAL_ERROR: i32 = 4;
/// Sweep/group canceled by user.
pub const CANCELED: i32 = 5;
/// Invalid sweep plan.
pub const INVALID_PLAN: i32 = 6;
