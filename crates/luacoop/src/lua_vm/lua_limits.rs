//! Centralized VM limits and configuration constants.
//!
//! Mirrors the Lua 5.1 `luaconf.h` / `llimits.h` values the interpreter
//! depends on, plus the tuning knobs of the table and scheduler.

// ===== Calls =====

/// Default maximum number of Lua frames on one thread.
pub const MAX_CALL_DEPTH: usize = 200;

/// Default maximum nesting of host-to-Lua re-entry (pcall, metamethods,
/// host calls). Matches Lua 5.1's LUAI_MAXCCALLS.
pub const MAX_NATIVE_DEPTH: usize = 200;

/// Default number of instructions one resume may execute.
pub const DEFAULT_INSTRUCTION_FUSE: u64 = 100_000_000;

// ===== Tables =====

/// Number of list items flushed per SETLIST instruction.
/// Matches Lua 5.1's LFIELDS_PER_FLUSH.
pub const LFIELDS_PER_FLUSH: usize = 50;

/// log2 of the largest array part. Matches Lua 5.1's MAXBITS.
pub const MAX_ARRAY_BITS: usize = 26;

/// Collision chain length that forces a hash part to grow.
pub const MAX_CHAIN_LEN: usize = 8;

/// Smallest non-empty bucket array.
pub const MIN_HASH_SIZE: usize = 4;

// ===== Metamethods =====

/// Maximum depth for __index / __newindex chains. Matches Lua 5.1's MAXTAGLOOP.
pub const MAXTAGLOOP: usize = 100;

// ===== Diagnostics =====

/// Frames listed in a traceback before the middle is elided.
pub const MAX_TRACEBACK_LEVELS: usize = 20;

/// Maximum length of a source name in error positions. Matches LUA_IDSIZE.
pub const LUA_IDSIZE: usize = 60;

// ===== Intrinsics =====

/// Most values `unpack` may return at once. Matches Lua 5.1's LUAI_MAXCSTACK.
pub const MAX_UNPACK: usize = 8000;
