//! Line wrapping human-readable output.

use std::fmt;
use std::io;
use std::sync::OnceLock;

/// A non-breaking space.
pub const NBSP: char = '\u{00A0}';

/// Writes the given message to `stream`, wrapping lines.
///
/// Hint: Use `wwriteln!(stream=.., ..)` instead of invoking this
/// function directly.
///
/// # Panics
///
/// Like `eprintln`, panics if the stream cannot be written to.
pub fn wwriteln(stream: &mut dyn io::Write, msg: fmt::Arguments) {
    iwwriteln(stream, "", "", msg)
}

/// Writes the given message to `stream`, indenting continuations.
///
/// Hint: Use `wwriteln!(stream=.., indent="...", ..)` instead of
/// invoking this function directly.
///
/// # Panics
///
/// Like `eprintln`, panics if the stream cannot be written to.
pub fn iwwriteln(stream: &mut dyn io::Write,
                 initial_indent: &str,
                 subsequent_indent: &str,
                 msg: fmt::Arguments) {
    let m = format!("{}", msg);
    let options = options()
        .initial_indent(initial_indent)
        .subsequent_indent(subsequent_indent);
    for l in textwrap::wrap(&m, options) {
        if let Err(err) = writeln!(stream, "{}", l) {
            panic!("Error writing to output stream: {}", err);
        }
    }
}

/// Returns options for text-wrapping.
fn options() -> textwrap::Options<'static> {
    static OPTIONS: OnceLock<textwrap::Options> = OnceLock::new();
    OPTIONS.get_or_init(|| {
        // It is better to use terminal_size instead of letting
        // textwrap do it, because textwrap uses an older version,
        // leading to duplicate crates.
        textwrap::Options::new(terminal_width())
    }).clone()
}

/// Returns the terminal width we assume for wrapping.
pub fn terminal_width() -> usize {
    terminal_size::terminal_size().map(|(w, _h)| w.0)
        .unwrap_or(80)
        .into()
}
