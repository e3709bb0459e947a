pub mod javascript;
pub mod python;

pub use javascript::JavaScriptExecutor;
pub use python::PythonExecutor;
