//! Python launcher that hosts the target program under pdb
//!
//! The generated script talks pdb's textual protocol over the process's own
//! stdin/stdout. Every reply ends with the configured prompt terminator,
//! including the final one after the program finishes.
//!
//! The target's `sys.stdout` is wrapped so the debugger knows when the
//! program left a line unterminated; pdb's own output then starts on a fresh
//! line. Exceptions raised while stepping are announced with
//! [`EXCEPTION_MARKER`] so program text that merely looks like an exception
//! is never taken for one.

use crate::common::Result;

use super::parser::EXCEPTION_MARKER;

/// Alias printing the last uncaught exception (`sys.last_value`)
pub const EXC_LAST_ALIAS: &str = "pdb_dap_exc_last";
/// Alias printing the frame-local `__exception__` tuple
pub const EXC_FRAME_ALIAS: &str = "pdb_dap_exc_frame";

/// Everything runs inside a function: pdb clears `__main__` globals before
/// running the target, so module-level names would vanish.
const SCRIPT: &str = r#"def _pdb_dap_main(program, prompt, argv):
    import builtins
    import pdb
    import sys
    import traceback

    class ProgramStdout:
        def __init__(self, stream):
            self._stream = stream
            self.line_open = False

        def write(self, text):
            if text:
                self.line_open = not text.endswith("\n")
            return self._stream.write(text)

        def __getattr__(self, name):
            return getattr(self._stream, name)

    real_stdout = sys.stdout
    program_stdout = ProgramStdout(real_stdout)

    class Debugger(pdb.Pdb):
        def fresh_line(self):
            if program_stdout.line_open:
                self.stdout.write("\n")
                program_stdout.line_open = False

        def message(self, msg):
            self.fresh_line()
            super().message(msg)

        def user_exception(self, frame, exc_info):
            self.fresh_line()
            self.stdout.write("@EXC_MARKER@\n")
            super().user_exception(frame, exc_info)

    debugger = Debugger(readrc=False, stdout=real_stdout)
    debugger.prompt = prompt
    debugger.use_rawinput = False

    def print_exception(exc):
        if isinstance(exc, tuple):
            exc = exc[1] if len(exc) > 1 else None
        if exc is None:
            return
        out = debugger.stdout
        text = str(exc)
        if text:
            out.write("%s: %s\n" % (type(exc).__name__, text))
        else:
            out.write("%s\n" % type(exc).__name__)
        tb = getattr(exc, "__traceback__", None)
        if tb is not None:
            out.write("Traceback (most recent call last):\n")
            out.write("".join(traceback.format_tb(tb)))
        out.flush()

    builtins.__pdb_dap_print_exception__ = print_exception
    debugger.rcLines.extend([
        'alias @EXC_LAST@ !__pdb_dap_print_exception__(getattr(__import__("sys"), "last_value", None))',
        'alias @EXC_FRAME@ !__pdb_dap_print_exception__(locals().get("__exception__"))',
    ])

    sys.argv = [program] + list(argv)
    sys.stdout = program_stdout
    target = None
    if hasattr(pdb, "ScriptTarget"):
        target = pdb.ScriptTarget(program)
    elif hasattr(pdb, "_ScriptTarget"):
        target = pdb._ScriptTarget(program)

    try:
        if target is not None:
            debugger._run(target)
        else:
            debugger._runscript(program)
    except SystemExit as exc:
        debugger.fresh_line()
        debugger.stdout.write("The program exited via sys.exit(). Exit status: %s\n" % (exc.code,))
    except BaseException:
        exc_type, exc_value, exc_tb = sys.exc_info()
        sys.last_type, sys.last_value, sys.last_traceback = exc_type, exc_value, exc_tb
        sys.last_exc = exc_value
        debugger.fresh_line()
        traceback.print_exc(file=debugger.stdout)
        debugger.stdout.write("Uncaught exception. Entering post mortem debugging\n")
        debugger.stdout.flush()
        debugger.reset()
        debugger.interaction(None, exc_tb)

    debugger.fresh_line()
    debugger.stdout.write("The program finished and will be restarted\n")
    debugger.stdout.write(prompt)
    debugger.stdout.flush()


_pdb_dap_main(@PROGRAM@, @PROMPT@, @ARGV@)
"#;

/// Generates the launcher script for one session
#[derive(Debug, Clone)]
pub struct Bootstrap {
    terminator: String,
}

impl Bootstrap {
    pub fn new(terminator: impl Into<String>) -> Self {
        Self {
            terminator: terminator.into(),
        }
    }

    /// Prompt terminator the script configures
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// Render the script for `program` (a sandbox path) with its arguments
    pub fn render(&self, program: &str, args: &[String]) -> Result<String> {
        // JSON string and list literals are valid Python literals
        Ok(SCRIPT
            .replace("@EXC_LAST@", EXC_LAST_ALIAS)
            .replace("@EXC_FRAME@", EXC_FRAME_ALIAS)
            .replace("@EXC_MARKER@", EXCEPTION_MARKER)
            .replace("@PROGRAM@", &serde_json::to_string(program)?)
            .replace("@PROMPT@", &serde_json::to_string(&self.terminator)?)
            .replace("@ARGV@", &serde_json::to_string(args)?))
    }
}
