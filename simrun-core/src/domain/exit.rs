//! Process exit codes of the runner
//!
//! Values follow the BSD `sysexits.h` conventions so they rarely collide with
//! the small codes simulations usually return. A failed simulation's own code
//! is propagated unchanged.

/// The job reached `Done`
pub const SUCCESS: i32 = 0;

/// The job description could not be parsed or validated (`EX_DATAERR`)
pub const MALFORMED_JOB: i32 = 65;

/// An input could not be staged (`EX_NOINPUT`)
pub const INPUT_FETCH: i32 = 66;

/// The command could not be started (`EX_UNAVAILABLE`)
pub const EXECUTION_START: i32 = 69;

/// The runner itself could not be set up: configuration, working directory (`EX_SOFTWARE`)
pub const RUNNER_SETUP: i32 = 70;

/// The command succeeded but at least one output failed to upload (`EX_IOERR`)
pub const OUTPUT_PUBLISH: i32 = 74;

/// Exit code reported by shells for a child terminated by `signal`
pub fn from_signal(signal: i32) -> i32 {
    128 + signal
}
