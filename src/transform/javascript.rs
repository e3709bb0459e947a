use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::{Node, Parser};

use super::SourceTransform;

/// Call the JavaScript worker defines before running user code.
pub const GUARD_CALL: &str = "__checkIteration__();";

const LOOP_KINDS: [&str; 4] = [
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
];

static LOOP_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:for|while)\s*\((?:[^()]|\([^()]*\))*\)\s*\{|\bdo\s*\{")
        .expect("loop header pattern is valid")
});

/// Injects `__checkIteration__();` as the first statement of every loop body.
#[derive(Clone, Copy, Debug, Default)]
pub struct JavaScriptLoopGuard;

impl JavaScriptLoopGuard {
    pub fn new() -> Self {
        Self
    }
}

impl SourceTransform for JavaScriptLoopGuard {
    #[tracing::instrument(skip_all, fields(len = code.len()))]
    fn transform(&self, code: &str) -> String {
        match instrument_syntax_tree(code) {
            Some(instrumented) => instrumented,
            None => {
                tracing::debug!("Source does not parse cleanly, using textual loop guard");
                instrument_text(code)
            }
        }
    }
}

#[derive(Debug)]
struct Insertion {
    offset: usize,
    text: String,
}

fn instrument_syntax_tree(code: &str) -> Option<String> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .ok()?;
    let tree = parser.parse(code, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let mut insertions = Vec::new();
    collect_loop_insertions(root, &mut insertions);

    // Apply back to front so earlier offsets stay valid.
    insertions.sort_by(|a, b| b.offset.cmp(&a.offset));
    let mut instrumented = code.to_string();
    for insertion in insertions {
        instrumented.insert_str(insertion.offset, &insertion.text);
    }

    Some(instrumented)
}

fn collect_loop_insertions(node: Node<'_>, insertions: &mut Vec<Insertion>) {
    if LOOP_KINDS.contains(&node.kind()) {
        if let Some(body) = node.child_by_field_name("body") {
            if body.kind() == "statement_block" {
                insertions.push(Insertion {
                    offset: body.start_byte() + 1,
                    text: format!(" {}", GUARD_CALL),
                });
            } else {
                insertions.push(Insertion {
                    offset: body.start_byte(),
                    text: format!("{{ {} ", GUARD_CALL),
                });
                insertions.push(Insertion {
                    offset: body.end_byte(),
                    text: " }".to_string(),
                });
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_loop_insertions(child, insertions);
    }
}

fn instrument_text(code: &str) -> String {
    LOOP_HEADER_RE
        .replace_all(code, |caps: &regex::Captures<'_>| {
            format!("{} {}", &caps[0], GUARD_CALL)
        })
        .into_owned()
}
