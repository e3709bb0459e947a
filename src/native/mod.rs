/// Native module runs workers as local interpreter processes
/// (`node`, `python3`) driven by embedded bootstrap scripts.
pub mod process;
