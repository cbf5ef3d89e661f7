//! Shared utilities

/// What to print when a reply grows from `printed` to `content`.
///
/// Replies usually grow by appending, so only the new suffix is returned.
/// When the text was replaced (a recovered reply, an error text) the whole
/// content is returned on a fresh line.
pub fn reply_delta<'a>(printed: &str, content: &'a str) -> ReplyDelta<'a> {
    match content.strip_prefix(printed) {
        Some(rest) => ReplyDelta::Append(rest),
        None => ReplyDelta::Replace(content),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReplyDelta<'a> {
    Append(&'a str),
    Replace(&'a str),
}
