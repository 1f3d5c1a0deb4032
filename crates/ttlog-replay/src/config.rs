//! Replay and recording configuration.

/// Configuration for a replay session.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Restore cached root-call checkpoints instead of re-executing the
    /// actions they cover. Default: true.
    pub fast_forward: bool,
    /// Attach a checkpoint to every root call-begin after its call-end
    /// executes. Default: false.
    pub capture_root_checkpoints: bool,
    /// Fail when a call's replayed outcome disagrees with its recorded
    /// exception flags (otherwise only warn). Default: false.
    pub verify_exception_flags: bool,
    /// Maximum nested call depth. Default: 256.
    pub max_call_depth: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            fast_forward: true,
            capture_root_checkpoints: false,
            verify_exception_flags: false,
            max_call_depth: 256,
        }
    }
}

/// Configuration for a recorder.
#[derive(Debug, Clone, Default)]
pub struct RecorderConfig {
    /// Attach the diagnostics sub-record (function name) to call-begins.
    pub capture_diagnostics: bool,
}
