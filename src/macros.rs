/// Like `writeln!`, but nicely wraps lines.
///
/// Unlike `writeln` and like `eprintln` panics if it can't write to
/// the specified stream.
#[macro_export]
macro_rules! wwriteln {
    {
        stream=$stream: expr
    } => {{
        let stream: &mut dyn std::io::Write = $stream;
        if let Err(err) = writeln!(stream) {
            panic!("Error writing to output stream: {}", err);
        }
    }};

    {
        stream=$stream: expr,
        indent=$i: expr,
        $($arg: expr),*
    } => {{
        let stream: &mut dyn std::io::Write = $stream;
        let i = $i;
        $crate::output::wrapping::iwwriteln(
            stream,
            i.as_ref(), i.as_ref(),
            format_args!($($arg),*))
    }};

    {
        stream=$stream: expr,
        initial_indent=$ii: expr,
        subsequent_indent=$si: expr,
        $($arg: expr),*
    } => {{
        let stream: &mut dyn std::io::Write = $stream;
        let ii = $ii;
        let si = $si;
        $crate::output::wrapping::iwwriteln(
            stream,
            ii.as_ref(), si.as_ref(),
            format_args!($($arg),*))
    }};

    {
        stream=$stream: expr,
        $($arg: expr),*
    } => {{
        let stream: &mut dyn std::io::Write = $stream;
        $crate::output::wrapping::wwriteln(
            stream, format_args!($($arg),*))
    }};
}

/// Like eprintln, but nicely wraps lines.
#[macro_export]
macro_rules! wprintln {
    { } => {
        $crate::wwriteln!(stream=&mut std::io::stderr())
    };

    {
        indent=$i: expr,
        $($arg: expr),*
    } => {
        $crate::wwriteln!(stream=&mut std::io::stderr(),
                          indent=$i,
                          $($arg),*)
    };

    {
        initial_indent=$ii: expr,
        subsequent_indent=$si: expr,
        $($arg: expr),*
    } => {
        $crate::wwriteln!(stream=&mut std::io::stderr(),
                          initial_indent=$ii,
                          subsequent_indent=$si,
                          $($arg),*)
    };

    {
        $($arg: expr),*
    } => {
        $crate::wwriteln!(stream=&mut std::io::stderr(), $($arg),*)
    };
}
