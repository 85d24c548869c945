//! The runner that lives inside each sandbox.
//!
//! It accepts one execution request over HTTP, writes the code to a file,
//! runs it through the language's launcher script once per input and
//! answers with one [`ExecutionResult`](crate::protocol::ExecutionResult)
//! per input.
//!
//! Launchers are plain shell scripts named `{language}.sh` that take the
//! source file path as their only argument, e.g. `python.sh`:
//!
//! ```sh
//! exec python3 "$1"
//! ```

mod config;
mod executor;
mod language;
mod server;

pub use config::RunnerConfig;
pub use executor::{DRAIN_GRACE, Executor};
pub use language::{JAVASCRIPT_SHIM, Language, LanguageRegistry};
pub use server::{router, run, serve};
