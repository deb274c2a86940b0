use crate::lua_vm::lua_limits::{DEFAULT_INSTRUCTION_FUSE, MAX_CALL_DEPTH, MAX_NATIVE_DEPTH};

#[derive(Debug, Clone)]
pub struct SafeOption {
    /// Lua frames a single thread may hold before "stack overflow".
    pub max_call_depth: usize,
    /// Host-to-Lua re-entry depth before "C stack overflow".
    pub max_native_depth: usize,
    /// Instructions one resume may run before the thread is killed.
    /// `None` disables the fuse.
    pub instruction_fuse: Option<u64>,
    /// Frame budget `ThreadGroup::update` passes to each resume.
    pub max_frames_per_tick: usize,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_call_depth: MAX_CALL_DEPTH,
            max_native_depth: MAX_NATIVE_DEPTH,
            instruction_fuse: Some(DEFAULT_INSTRUCTION_FUSE),
            max_frames_per_tick: usize::MAX,
        }
    }
}
