//! Indentation-based scope extraction for Python sources
//!
//! Builds class/method/function line ranges with a single line scan over two
//! explicit stacks - no AST, no recursion. Malformed input yields an empty
//! result rather than an error.

use regex::Regex;
use std::sync::OnceLock;

/// What a scope node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Class,
    Function,
    Method,
}

/// A class, function, or method with its 1-indexed inclusive line range.
///
/// `children` holds methods and is only non-empty for classes. Nested classes
/// are emitted as their own top-level entries, in encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeNode {
    pub kind: ScopeKind,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub children: Vec<ScopeNode>,
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*class\s+(\w+)").expect("valid regex"))
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*def\s+(\w+)").expect("valid regex"))
}

/// Count of leading whitespace characters on a line.
fn leading_indent(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Scope under construction; `end_line` stays `None` until the scope closes.
#[derive(Debug)]
struct PendingScope {
    name: String,
    start_line: usize,
    end_line: Option<usize>,
}

/// Where an open function lives: the flat function arena, or a method slot
/// inside a class arena entry.
#[derive(Debug, Clone, Copy)]
enum FnSlot {
    TopLevel(usize),
    Method { class: usize, method: usize },
}

#[derive(Debug)]
struct OpenFn {
    slot: FnSlot,
    indent: usize,
}

#[derive(Debug)]
struct OpenClass {
    idx: usize,
    indent: usize,
}

#[derive(Debug)]
struct PendingClass {
    scope: PendingScope,
    methods: Vec<PendingScope>,
}

/// Extract the scope tree from raw source text.
///
/// Returns every class in encounter order (nested classes included as their
/// own entries, methods attached as children), followed by top-level
/// functions in encounter order. Lines are the `'\n'`-split segments of the
/// input, so a trailing newline contributes one final empty line to the
/// count used when closing scopes at end of input.
pub fn build(text: &str) -> Vec<ScopeNode> {
    let lines: Vec<&str> = text.split('\n').collect();
    let total_lines = lines.len();

    let mut classes: Vec<PendingClass> = Vec::new();
    let mut functions: Vec<PendingScope> = Vec::new();
    let mut class_stack: Vec<OpenClass> = Vec::new();
    let mut fn_stack: Vec<OpenFn> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let line_num = i + 1;
        let stripped = line.trim();

        // Blank and comment lines never open or close scopes, but they still
        // count toward line numbers.
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let indent = leading_indent(line);

        if let Some(caps) = class_re().captures(line) {
            close_functions(&mut fn_stack, &mut classes, &mut functions, indent, line_num - 1);

            // Only siblings close each other; a deeper class below the new
            // indentation stays open as an ancestor.
            while class_stack.last().is_some_and(|c| c.indent == indent) {
                if let Some(open) = class_stack.pop() {
                    classes[open.idx].scope.end_line = Some(line_num - 1);
                }
            }

            let idx = classes.len();
            classes.push(PendingClass {
                scope: PendingScope {
                    name: caps[1].to_string(),
                    start_line: line_num,
                    end_line: None,
                },
                methods: Vec::new(),
            });
            class_stack.push(OpenClass { idx, indent });
        } else if let Some(caps) = def_re().captures(line) {
            close_functions(&mut fn_stack, &mut classes, &mut functions, indent, line_num - 1);

            // A def at or above a class's indentation ends that class's body.
            while class_stack.last().is_some_and(|c| c.indent >= indent) {
                if let Some(open) = class_stack.pop() {
                    classes[open.idx].scope.end_line = Some(line_num - 1);
                }
            }

            let name = caps[1].to_string();
            let scope = PendingScope {
                name,
                start_line: line_num,
                end_line: None,
            };

            // Innermost open class strictly shallower than the def owns it as
            // a method; otherwise it is a top-level function.
            let owner = class_stack
                .iter()
                .rev()
                .find(|c| indent > c.indent)
                .map(|c| c.idx);

            match owner {
                Some(class_idx) => {
                    let method_idx = classes[class_idx].methods.len();
                    classes[class_idx].methods.push(scope);
                    fn_stack.push(OpenFn {
                        slot: FnSlot::Method {
                            class: class_idx,
                            method: method_idx,
                        },
                        indent,
                    });
                }
                None => {
                    let idx = functions.len();
                    functions.push(scope);
                    fn_stack.push(OpenFn {
                        slot: FnSlot::TopLevel(idx),
                        indent,
                    });
                }
            }
        }
    }

    // End of input closes everything still open.
    for open in fn_stack {
        set_fn_end(&mut classes, &mut functions, open.slot, total_lines);
    }
    for open in class_stack {
        classes[open.idx].scope.end_line = Some(total_lines);
    }

    let mut out = Vec::with_capacity(classes.len() + functions.len());
    for class in classes {
        let children = class
            .methods
            .into_iter()
            .map(|m| ScopeNode {
                kind: ScopeKind::Method,
                name: m.name,
                start_line: m.start_line,
                end_line: m.end_line.unwrap_or(total_lines),
                children: Vec::new(),
            })
            .collect();
        out.push(ScopeNode {
            kind: ScopeKind::Class,
            name: class.scope.name,
            start_line: class.scope.start_line,
            end_line: class.scope.end_line.unwrap_or(total_lines),
            children,
        });
    }
    for func in functions {
        out.push(ScopeNode {
            kind: ScopeKind::Function,
            name: func.name,
            start_line: func.start_line,
            end_line: func.end_line.unwrap_or(total_lines),
            children: Vec::new(),
        });
    }
    out
}

/// Close every open function/method whose indentation is >= `indent`.
fn close_functions(
    fn_stack: &mut Vec<OpenFn>,
    classes: &mut [PendingClass],
    functions: &mut [PendingScope],
    indent: usize,
    end_line: usize,
) {
    while fn_stack.last().is_some_and(|f| f.indent >= indent) {
        if let Some(open) = fn_stack.pop() {
            set_fn_end(classes, functions, open.slot, end_line);
        }
    }
}

fn set_fn_end(
    classes: &mut [PendingClass],
    functions: &mut [PendingScope],
    slot: FnSlot,
    end_line: usize,
) {
    match slot {
        FnSlot::TopLevel(idx) => functions[idx].end_line = Some(end_line),
        FnSlot::Method { class, method } => {
            classes[class].methods[method].end_line = Some(end_line)
        }
    }
}
