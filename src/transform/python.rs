use std::sync::LazyLock;

use regex::Regex;

use super::SourceTransform;

pub const GUARD_CALL: &str = "__LoopGuard.check()";

/// Class bodies mangle `__LoopGuard` into `_Class__LoopGuard`, so calls
/// emitted there look the guard up by string instead.
pub const MANGLE_SAFE_GUARD_CALL: &str = "globals()[\"__LoopGuard\"].check()";

static LOOP_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:while|for)\b.*:[ \t]*(?:#.*)?$").expect("loop header pattern is valid")
});

static CLASS_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^class\s+\w+.*:[ \t]*(?:#.*)?$").expect("class header pattern is valid")
});

/// Line-based loop guard for indentation-scoped Python source.
#[derive(Clone, Copy, Debug)]
pub struct PythonLoopGuard {
    max_iterations: u64,
}

impl PythonLoopGuard {
    pub fn new(max_iterations: u64) -> Self {
        Self { max_iterations }
    }

    fn prelude(&self) -> String {
        format!(
            "class __LoopGuard:\n\
             \x20   iterations = 0\n\
             \x20   max_iterations = {max}\n\
             \n\
             \x20   @classmethod\n\
             \x20   def check(cls):\n\
             \x20       cls.iterations += 1\n\
             \x20       if cls.iterations > cls.max_iterations:\n\
             \x20           raise RuntimeError(\"Infinite loop detected: exceeded {max} iterations\")\n",
            max = self.max_iterations
        )
    }
}

impl SourceTransform for PythonLoopGuard {
    #[tracing::instrument(skip_all, fields(len = code.len()))]
    fn transform(&self, code: &str) -> String {
        let mut lines = Vec::new();
        let mut found_loop = false;
        // Indentation widths of the enclosing `class` headers.
        let mut class_scopes: Vec<usize> = Vec::new();

        for line in code.split('\n') {
            let header = line.trim_end_matches('\r');
            let trimmed = header.trim_start();
            let indent = &header[..header.len() - trimmed.len()];

            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                while class_scopes.last().is_some_and(|&width| width >= indent.len()) {
                    class_scopes.pop();
                }
            }

            lines.push(line.to_string());

            if LOOP_HEADER_RE.is_match(trimmed) {
                found_loop = true;
                let call = if class_scopes.is_empty() {
                    GUARD_CALL
                } else {
                    MANGLE_SAFE_GUARD_CALL
                };
                lines.push(format!("{indent}    {call}"));
            } else if CLASS_HEADER_RE.is_match(trimmed) {
                class_scopes.push(indent.len());
            }
        }

        if !found_loop {
            return code.to_string();
        }

        format!("{}{}", self.prelude(), lines.join("\n"))
    }
}
