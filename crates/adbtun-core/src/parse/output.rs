//! Helpers for trimming captured command output.

/// Returns `output` up to (not including) the first space, tab, CR, or LF.
///
/// Used for single-value commands such as `get-serialno` and
/// `shell getprop <name>`, whose output is one token followed by a newline.
pub fn first_token(output: &str) -> &str {
    let end = output
        .find([' ', '\t', '\r', '\n'])
        .unwrap_or(output.len());
    &output[..end]
}

/// Returns `output` up to (not including) the first CR or LF.
pub fn first_line(output: &str) -> &str {
    let end = output.find(['\r', '\n']).unwrap_or(output.len());
    &output[..end]
}
