//! Parsers for pdb's textual replies
//!
//! pdb's output is human-oriented text, not a designed wire format. Every
//! grammar the bridge relies on lives here, with tests pinned to literal
//! sample utterances so a format change upstream fails loudly.

use std::sync::LazyLock;

use regex::Regex;

/// Marker printed when the target runs to completion
pub const PROGRAM_FINISHED: &str = "The program finished and will be restarted";
/// Marker printed before post-mortem interaction on an uncaught exception
pub const UNCAUGHT_EXCEPTION: &str = "Uncaught exception. Entering post mortem debugging";
/// Marker pdb prints when stopping on a function return
pub const RETURN_MARKER: &str = "--Return--";
/// Marker pdb prints when stopping on a function call
pub const CALL_MARKER: &str = "--Call--";
/// Marker the bootstrap prints when a step stops on a raised exception
pub const EXCEPTION_MARKER: &str = "--Exception--";
/// Header of a Python traceback
pub const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Dunder name kept in variable listings
pub const KEPT_DUNDER: &str = "__exception__";

/// `> /path/file.py(12)func()` as printed by pdb at a stop and by `where`
static PROMPT_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[>,\s]\s*(?P<path>.+?)\((?P<line>\d+)\)(?P<name>[^()]*)\(\)")
        .expect("must compile")
});

/// A stop frame line glued onto program output that did not end its line,
/// as in `partial> /path/file.py(12)func()`
static GLUED_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"> (?P<path>\S.*?)\((?P<line>\d+)\)(?P<name>[^()]*)\(\)(?:->.*)?$")
        .expect("must compile")
});

/// `  File "/path/file.py", line 12, in func` from a traceback
static TRACEBACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File "(?P<path>[^"]+)", line (?P<line>\d+)(?:, in (?P<name>.+))?"#)
        .expect("must compile")
});

/// `Breakpoint 1 at /path/file.py:12`
static BREAKPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Breakpoint (?P<id>\d+) at (?P<path>.+):(?P<line>\d+)\s*$").expect("must compile")
});

static SYNTAX_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^SyntaxError\b").expect("must compile"));

/// A frame parsed from debugger text, before path translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    /// 1 = innermost
    pub id: usize,
    /// Path as the debugged program sees it
    pub path: String,
    pub line: u32,
    pub name: String,
}

/// A breakpoint confirmed by the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointConfirmation {
    pub id: u32,
    pub path: String,
    pub line: u32,
}

/// How a run-class reply should drive the session
///
/// `before` is the text preceding the marker, which belongs to the user console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<'a> {
    ProgramFinished { before: &'a str },
    UncaughtException { before: &'a str },
    SyntaxError { before: &'a str },
    FunctionReturn { before: &'a str },
    FunctionCall { before: &'a str },
    Stopped,
}

/// An exception as printed by the bootstrap's exception aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReport {
    pub type_name: String,
    pub message: String,
    pub traceback: Option<String>,
}

fn parse_prompt_frame(line: &str) -> Option<(String, u32, String)> {
    let caps = PROMPT_FRAME.captures(line)?;
    let line_no = caps["line"].parse().ok()?;
    Some((
        caps["path"].trim().to_string(),
        line_no,
        caps["name"].trim().to_string(),
    ))
}

fn parse_traceback_frame(line: &str) -> Option<(String, u32, String)> {
    let caps = TRACEBACK_FRAME.captures(line)?;
    let line_no = caps["line"].parse().ok()?;
    let name = caps
        .name("name")
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((caps["path"].to_string(), line_no, name))
}

/// Parse stack frames from a stop or `where` reply
///
/// The debugger prints the outermost frame first; the result is ordered
/// innermost first with ids 1..=n. Lines that are not frames are ignored.
/// Call on the text from [`split_preamble`]'s frame start when the reply
/// may carry program output.
pub fn parse_stack_frames(text: &str) -> Vec<ParsedFrame> {
    let found: Vec<(String, u32, String)> = text
        .lines()
        .filter_map(|line| parse_prompt_frame(line).or_else(|| parse_traceback_frame(line)))
        .collect();

    found
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, (path, line, name))| ParsedFrame {
            id: i + 1,
            path,
            line,
            name,
        })
        .collect()
}

/// Whether a frame belongs to the debugger machinery rather than the program
pub fn is_internal_frame(path: &str) -> bool {
    if path.starts_with('<') && path.ends_with('>') {
        return true;
    }
    let normalized = path.replace('\\', "/");
    let file = normalized.rsplit('/').next().unwrap_or(&normalized);
    matches!(file, "bdb.py" | "pdb.py")
}

/// Parse the reply to `b <path>:<line>`
pub fn parse_breakpoint(text: &str) -> Option<BreakpointConfirmation> {
    text.lines().find_map(|line| {
        let caps = BREAKPOINT.captures(line.trim_end())?;
        Some(BreakpointConfirmation {
            id: caps["id"].parse().ok()?,
            path: caps["path"].to_string(),
            line: caps["line"].parse().ok()?,
        })
    })
}

/// Error message from a `*** ...` reply, if the debugger rejected the command
pub fn debugger_error(text: &str) -> Option<&str> {
    text.lines()
        .find_map(|line| line.strip_prefix("*** "))
        .map(str::trim)
}

/// Byte offset of the start of the first line satisfying `pred`
fn find_line(text: &str, mut pred: impl FnMut(&str) -> bool) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if pred(content) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Classify a run-class reply
///
/// Markers are checked in priority order because one reply can carry
/// several: finished, then uncaught exception or syntax error, then
/// return, then call. A syntax error only counts when pdb never reached a
/// frame; with a frame present, `SyntaxError: ...` is program output.
pub fn classify(text: &str) -> Classification<'_> {
    if let Some(at) = find_line(text, |l| l.contains(PROGRAM_FINISHED)) {
        return Classification::ProgramFinished {
            before: &text[..at],
        };
    }
    if let Some(at) = find_line(text, |l| l.contains(UNCAUGHT_EXCEPTION)) {
        return Classification::UncaughtException {
            before: &text[..at],
        };
    }
    if frame_start(text).is_none() && SYNTAX_ERROR.is_match(text) {
        let at = find_line(text, |l| l.starts_with("SyntaxError")).unwrap_or(text.len());
        // The traceback leading up to the error is part of what the user sees
        let end = text[at..].find('\n').map(|i| at + i + 1).unwrap_or(text.len());
        return Classification::SyntaxError {
            before: &text[..end],
        };
    }
    if let Some(at) = find_line(text, |l| l.trim() == RETURN_MARKER) {
        return Classification::FunctionReturn {
            before: &text[..at],
        };
    }
    if let Some(at) = find_line(text, |l| l.trim() == CALL_MARKER) {
        return Classification::FunctionCall {
            before: &text[..at],
        };
    }
    Classification::Stopped
}

/// Byte offset where the stop's frame listing starts
///
/// Either a line starting with a frame, or a `> path(n)name()` glued onto
/// unterminated program output and followed by pdb's `-> ` source line.
fn frame_start(text: &str) -> Option<usize> {
    let mut offset = 0;
    let mut lines = text.split_inclusive('\n').peekable();

    while let Some(line) = lines.next() {
        let content = line.trim_end_matches(['\n', '\r']);
        if PROMPT_FRAME.is_match(content) {
            return Some(offset);
        }
        if let Some(glued) = GLUED_FRAME.find(content) {
            if lines.peek().is_some_and(|next| next.starts_with("-> ")) {
                return Some(offset + glued.start());
            }
        }
        offset += line.len();
    }
    None
}

/// Split a stop reply into the text before the first frame and the rest
pub fn split_preamble(text: &str) -> (&str, &str) {
    match frame_start(text) {
        Some(at) => text.split_at(at),
        None => (text, ""),
    }
}

/// Split a stop preamble at the step-exception marker
///
/// Returns the program output before the marker and whether the marker was
/// present. The marker line and pdb's `Type: message` line after it are
/// debugger text.
pub fn split_exception_marker(preamble: &str) -> (&str, bool) {
    match find_line(preamble, |l| l.trim() == EXCEPTION_MARKER) {
        Some(at) => (&preamble[..at], true),
        None => (preamble, false),
    }
}

/// Whether a line is produced by the debugger rather than the program
///
/// Used to hold back live forwarding; a false positive only delays output
/// until the reply is classified.
fn is_debugger_artifact(line: &str) -> bool {
    let trimmed = line.trim();
    PROMPT_FRAME.is_match(line)
        || GLUED_FRAME.is_match(line)
        || TRACEBACK_FRAME.is_match(line)
        || line.starts_with("-> ")
        || line.starts_with("*** ")
        || trimmed == RETURN_MARKER
        || trimmed == CALL_MARKER
        || trimmed == EXCEPTION_MARKER
        || line.starts_with(TRACEBACK_HEADER)
        || line.contains(PROGRAM_FINISHED)
        || line.contains(UNCAUGHT_EXCEPTION)
}

/// Length of the leading complete lines that are plain program output
///
/// Returns the byte length and whether a debugger artifact line was reached,
/// after which nothing more should be forwarded for this reply.
pub fn passthrough_len(text: &str) -> (usize, bool) {
    let mut len = 0;
    for line in text.split_inclusive('\n') {
        if !line.ends_with('\n') {
            break;
        }
        if is_debugger_artifact(line.trim_end_matches(['\n', '\r'])) {
            return (len, true);
        }
        len += line.len();
    }
    (len, false)
}

/// Parse the list printed by `p dir()`
///
/// Dunder names are dropped except [`KEPT_DUNDER`].
pub fn parse_variable_names(text: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    text[start + 1..end]
        .split(',')
        .map(|entry| entry.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|name| !name.is_empty())
        .filter(|name| *name == KEPT_DUNDER || !(name.starts_with("__") && name.ends_with("__")))
        .map(str::to_string)
        .collect()
}

/// Whether an expression is already a call to `print`
pub fn is_print_call(expression: &str) -> bool {
    let trimmed = expression.trim_start();
    trimmed
        .strip_prefix("print")
        .map(|rest| rest.trim_start().starts_with('('))
        .unwrap_or(false)
}

/// Parse the output of the exception aliases
///
/// The first line is `TypeName: message`, optionally followed by a
/// traceback. Empty output or a debugger error means no exception.
pub fn parse_exception_report(text: &str) -> Option<ExceptionReport> {
    let text = text.trim_matches(['\n', '\r']);
    if text.trim().is_empty() || debugger_error(text).is_some() {
        return None;
    }

    let (head, traceback) = match text.find(TRACEBACK_HEADER) {
        Some(at) => (&text[..at], Some(text[at..].trim_end().to_string())),
        None => (text, None),
    };
    let head = head.trim();
    let (type_name, message) = match head.split_once(':') {
        Some((t, m)) if !t.contains(char::is_whitespace) => (t.to_string(), m.trim().to_string()),
        _ => (head.to_string(), String::new()),
    };

    Some(ExceptionReport {
        type_name,
        message,
        traceback,
    })
}
