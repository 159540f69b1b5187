//! Renders an argument vector for diagnostics, bounded by a fixed capacity.
//!
//! Error logs include the failing command as `[adb], [-s], [0123], [reverse], ...`.
//! Arguments can be arbitrarily long (file paths for `push`/`install`), so the
//! rendering is capped: the result is always shorter than `capacity` bytes,
//! never ends in a half-written `[arg`, and ends with `...` when something was
//! left out.

/// Bytes reserved beyond an argument's length: `[`, `]`, `, `, a possible
/// `...`, and one byte kept free at the end of the buffer.
const RESERVED: usize = 8;

const ELLIPSIS: &str = "...";

/// Renders `argv` as `[a], [b], [c]`, truncating with `...` to stay strictly
/// below `capacity` bytes.
///
/// An argument is written only if `written + arg.len() + 8 < capacity`;
/// otherwise `...` is appended and rendering stops.  A capacity too small to
/// hold even the ellipsis (`< 4`) yields an empty string.
pub fn argv_to_string<S: AsRef<str>>(argv: &[S], capacity: usize) -> String {
    let mut out = String::with_capacity(capacity.min(256));

    for (i, arg) in argv.iter().enumerate() {
        let arg = arg.as_ref();
        if out.len() + arg.len() + RESERVED >= capacity {
            if out.len() + ELLIPSIS.len() < capacity {
                out.push_str(ELLIPSIS);
            }
            break;
        }
        if i > 0 {
            out.push_str(", ");
        }
        out.push('[');
        out.push_str(arg);
        out.push(']');
    }

    debug_assert!(capacity == 0 || out.len() < capacity);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
