//! Parser for Make-style dependency files.
//!
//! Compilers configured with the Makefile dependency kind emit a rule of the
//! form `target: prereq prereq ...`, wrapped with `\` line continuations and
//! sometimes followed by phony-target lines for each header. The parser
//! extracts the target and the prerequisite paths.
//!
//! Escape rules: `\` at end of line is a continuation everywhere; `\ `
//! escapes a space inside a path; `\#` escapes a hash. On windows, where the
//! backslash doubles as the path separator, `\\` is a literal pair and a `\`
//! followed by anything else is part of the path. The escape rules apply at
//! every position of a token.

use crate::error::Result;

/// The parsed content of one dependency file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MakefileDeps {
    pub target: String,
    pub prereqs: Vec<String>,
}

/// Parses `content` with the escape rules of the current platform.
pub fn parse(content: &str) -> Result<MakefileDeps> {
    parse_with_platform(content, cfg!(windows))
}

/// Platform-explicit variant, used directly by tests.
pub fn parse_with_platform(content: &str, windows: bool) -> Result<MakefileDeps> {
    let mut deps = MakefileDeps::default();
    let mut saw_target = false;

    for line in logical_lines(content) {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (target, rest) = split_rule(&line);
        if let Some(target) = target {
            let mut tokens = tokenize(target, windows);
            if !saw_target {
                if let Some(first) = tokens.drain(..).next() {
                    deps.target = first;
                    saw_target = true;
                }
            }
            // any further rule targets (e.g. phony header rules) are dropped
        }
        deps.prereqs.extend(tokenize(rest, windows));
    }

    Ok(deps)
}

/// Joins `\`-continued physical lines into logical ones.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for raw in content.lines() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(stripped) = continuation_body(line) {
            current.push_str(stripped);
            current.push(' ');
        } else {
            current.push_str(line);
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Returns the line body if it ends in an odd number of backslashes, i.e. a
/// continuation rather than an escaped backslash at end of line.
fn continuation_body(line: &str) -> Option<&str> {
    let trailing = line.bytes().rev().take_while(|&b| b == b'\\').count();
    (trailing % 2 == 1).then(|| &line[..line.len() - 1])
}

/// Splits a logical line at the rule colon. Returns `(target-part, rest)`;
/// the target part is `None` for continuation content without a colon.
///
/// The split colon is the first one followed by whitespace or end of line,
/// which keeps windows drive letters (`c:\...`) intact. A line with no such
/// colon falls back to its first colon, or to no split at all.
fn split_rule(line: &str) -> (Option<&str>, &str) {
    let bytes = line.as_bytes();
    let mut candidate = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b != b':' {
            continue;
        }
        if candidate.is_none() {
            candidate = Some(i);
        }
        match bytes.get(i + 1) {
            None => return (Some(&line[..i]), ""),
            Some(&next) if next == b' ' || next == b'\t' => {
                return (Some(&line[..i]), &line[i + 1..]);
            }
            _ => {}
        }
    }
    match candidate {
        Some(i) => (Some(&line[..i]), &line[i + 1..]),
        None => (None, line),
    }
}

/// Splits a prerequisite list into tokens, honoring the escape rules.
fn tokenize(input: &str, windows: bool) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            '\\' => match chars.peek().copied() {
                Some(' ') => {
                    chars.next();
                    token.push(' ');
                }
                Some('#') => {
                    chars.next();
                    token.push('#');
                }
                Some('\\') if windows => {
                    // a literal pair, both characters belong to the path
                    chars.next();
                    token.push('\\');
                    token.push('\\');
                }
                Some(_) if windows => {
                    // path separator
                    token.push('\\');
                }
                Some(next) => {
                    // keep unknown escapes verbatim
                    chars.next();
                    token.push('\\');
                    token.push(next);
                }
                None => token.push('\\'),
            },
            c => token.push(c),
        }
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_rule() {
        let deps = parse_with_platform("a.o: a.c a.h b.h\n", false).unwrap();
        assert_eq!(deps.target, "a.o");
        assert_eq!(deps.prereqs, ["a.c", "a.h", "b.h"]);
    }

    #[test]
    fn continuations_join_lines() {
        let deps =
            parse_with_platform("a.o: a.c \\\n  a.h \\\n  sub/b.h\n", false).unwrap();
        assert_eq!(deps.prereqs, ["a.c", "a.h", "sub/b.h"]);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let deps = parse_with_platform("# generated\n\na.o: a.c\n", false).unwrap();
        assert_eq!(deps.target, "a.o");
        assert_eq!(deps.prereqs, ["a.c"]);
    }

    #[test]
    fn escaped_spaces_stay_inside_paths() {
        let deps = parse_with_platform("a.o: dir/my\\ file.c next.h\n", false).unwrap();
        assert_eq!(deps.prereqs, ["dir/my file.c", "next.h"]);
    }

    #[test]
    fn phony_header_rules_contribute_nothing() {
        let deps = parse_with_platform("a.o: a.c a.h\n\na.h:\n", false).unwrap();
        assert_eq!(deps.target, "a.o");
        assert_eq!(deps.prereqs, ["a.c", "a.h"]);
    }

    #[test]
    fn windows_drive_letters_survive_the_split() {
        let deps = parse_with_platform("c:\\obj\\a.o: c:\\src\\a.c\n", true).unwrap();
        assert_eq!(deps.target, "c:\\obj\\a.o");
        assert_eq!(deps.prereqs, ["c:\\src\\a.c"]);
    }

    #[test]
    fn windows_literal_pair_applies_anywhere_in_a_token() {
        let deps = parse_with_platform("a.o: dir\\\\sub\\x.h\n", true).unwrap();
        assert_eq!(deps.prereqs, ["dir\\\\sub\\x.h"]);
    }

    #[test]
    fn trailing_escaped_backslash_is_not_a_continuation() {
        // two backslashes at end of line: an escaped backslash, no join
        let deps = parse_with_platform("a.o: weird\\\\\nb.h\n", true).unwrap();
        assert_eq!(deps.prereqs, ["weird\\\\", "b.h"]);
    }

    #[test]
    fn unix_keeps_backslash_pairs_verbatim() {
        let deps = parse_with_platform("a.o: we\\\\ird.c\n", false).unwrap();
        assert_eq!(deps.prereqs, ["we\\\\ird.c"]);
    }
}
