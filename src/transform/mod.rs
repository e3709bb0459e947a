//! Loop instrumentation applied to submitted code before it reaches a worker.
//!
//! Both rewrites are approximate: they catch straightforward runaway loops,
//! not adversarial code.

pub mod javascript;
pub mod python;

pub use javascript::JavaScriptLoopGuard;
pub use python::PythonLoopGuard;

pub trait SourceTransform: Send + Sync {
    /// Returns `code` unchanged when it contains no recognizable loop.
    fn transform(&self, code: &str) -> String;
}
