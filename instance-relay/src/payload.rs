//! Handshake payload: one line of text, the invocation command line with the
//! executable path replaced by the sender's [`InstanceIdentity`].

use crate::InstanceIdentity;

/// What the primary should do with a received line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forwarded {
    /// No arguments beyond the identity token, raise the existing window
    Surface,
    /// Arguments present, hand the whole line to the window quietly
    Deliver(String),
}

/// Builds the handshake line from the process arguments.
///
/// `args[0]` is dropped and the identity takes its place. Arguments that
/// would not survive a whitespace split are quoted, and line breaks are
/// escaped so the result is always a single line.
pub fn compose_line<S: AsRef<str>>(identity: &InstanceIdentity, args: &[S]) -> String {
    let mut line = identity.to_string();
    for arg in args.iter().skip(1) {
        line.push(' ');
        push_quoted(&mut line, arg.as_ref());
    }
    line
}

fn push_quoted(out: &mut String, arg: &str) {
    let needs_quotes =
        arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quotes {
        out.push_str(arg);
        return;
    }

    out.push('"');
    for c in arg.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Splits a handshake line back into tokens, undoing [`compose_line`]'s
/// quoting. The first token is the sender's identity.
pub fn split_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => match chars.next() {
                        Some('n') => token.push('\n'),
                        Some('r') => token.push('\r'),
                        Some(other) => token.push(other),
                        None => token.push('\\'),
                    },
                    c => token.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    tokens
}

/// Decides between surfacing the window and delivering arguments.
///
/// An empty line, or one holding only the identity token, means the
/// secondary was launched without arguments.
pub fn classify(line: &str) -> Forwarded {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.split_whitespace().count() <= 1 {
        Forwarded::Surface
    } else {
        Forwarded::Deliver(line.to_string())
    }
}
