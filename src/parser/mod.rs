//! The command parser. Pure: a comment body goes in, a list of intended [`Command`]s comes
//! out. No I/O, no Model access; parsing and mutation are kept separate so the parser is
//! independently testable.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `r+ [sha]`: approve as the commenter.
    ApproveSelf { expected_sha: Option<String> },
    /// `r=USER [sha]`: approve on behalf of `USER`.
    ApproveAs { user: String, expected_sha: Option<String> },
    /// `r-`: unapprove.
    Unapprove,
    /// `p=N`: set priority.
    SetPriority(i64),
    /// `try` / `try-`.
    SetTry(bool),
    /// `rollup` / `rollup-`.
    SetRollup(bool),
    /// `retry`: move back to `Approved` from `Failure`/`Error`.
    Retry,
    /// `force`: administrative, clears a `Testing` state without merging.
    Force,
    /// `clean`: drop the cached mergeability hint.
    Clean,
    /// `delegate=USER`.
    DelegateTo(String),
    /// `delegate+`: delegate to the pull request's own author.
    DelegateToAuthor,
    /// `delegate-`: revoke delegation.
    DelegateRevoke,
}

impl Command {
    /// Verbs that mutate approval state or priority and therefore require the commenter to be
    /// a reviewer, a delegate, or an administrator.
    pub fn requires_authorization(&self) -> bool {
        !matches!(self, Command::Clean)
    }

    /// Administrative-only verbs: `force`, and by extension delegation grants, which admins
    /// manage independently of the per-PR delegate.
    pub fn requires_admin(&self) -> bool {
        matches!(self, Command::Force | Command::DelegateTo(_) | Command::DelegateRevoke)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedComment {
    pub commenter: String,
    pub commands: Vec<Command>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Parses every line of `body` that starts with `trigger_token`, collecting every recognized
/// command. Returns `Ok(None)` if the comment contains no trigger line at all (not a Homu
/// command at all, as opposed to a malformed one). A single malformed verb anywhere in the
/// comment rejects the whole comment with no state change (a `BadCommand` error).
pub fn parse(trigger_token: &str, commenter: &str, body: &str) -> Result<Option<ParsedComment>, Error> {
    let mut commands = Vec::new();
    let mut saw_trigger = false;

    for line in body.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(trigger_token) else {
            continue;
        };
        saw_trigger = true;
        let mut tokens = rest.split_whitespace().peekable();
        while let Some(token) = tokens.next() {
            match parse_token(token, &mut tokens)? {
                Some(command) => commands.push(command),
                None => { /* unknown verb: ignored, not an error */ }
            }
        }
    }

    if !saw_trigger {
        return Ok(None);
    }
    Ok(Some(ParsedComment {
        commenter: commenter.to_string(),
        commands,
    }))
}

fn parse_token<'a, I>(token: &str, tokens: &mut std::iter::Peekable<I>) -> Result<Option<Command>, Error>
where
    I: Iterator<Item = &'a str>,
{
    if token == "r+" {
        return Ok(Some(Command::ApproveSelf {
            expected_sha: take_optional_sha(tokens),
        }));
    }
    if token == "r-" {
        return Ok(Some(Command::Unapprove));
    }
    if let Some(user) = token.strip_prefix("r=") {
        let user = require_nonempty(user)?;
        return Ok(Some(Command::ApproveAs {
            user: user.into(),
            expected_sha: take_optional_sha(tokens),
        }));
    }
    if let Some(value) = token.strip_prefix("p=") {
        let priority: i64 = value
            .parse()
            .map_err(|_| Error::MalformedCommand(format!("invalid priority: {}", value)))?;
        return Ok(Some(Command::SetPriority(priority)));
    }
    if token == "try" {
        return Ok(Some(Command::SetTry(true)));
    }
    if token == "try-" {
        return Ok(Some(Command::SetTry(false)));
    }
    if token == "rollup" {
        return Ok(Some(Command::SetRollup(true)));
    }
    if token == "rollup-" {
        return Ok(Some(Command::SetRollup(false)));
    }
    if token == "retry" {
        return Ok(Some(Command::Retry));
    }
    if token == "force" {
        return Ok(Some(Command::Force));
    }
    if token == "clean" {
        return Ok(Some(Command::Clean));
    }
    if let Some(user) = token.strip_prefix("delegate=") {
        return Ok(Some(Command::DelegateTo(require_nonempty(user)?.into())));
    }
    if token == "delegate+" {
        return Ok(Some(Command::DelegateToAuthor));
    }
    if token == "delegate-" {
        return Ok(Some(Command::DelegateRevoke));
    }
    Ok(None)
}

/// `r+`/`r=USER` may be optionally followed by the SHA the commenter expects to be approving
/// (`r+ [sha]`). Only consume the next token if it looks like a commit SHA, so a
/// trailing word of prose (or another command) isn't swallowed as one.
fn take_optional_sha<'a, I>(tokens: &mut std::iter::Peekable<I>) -> Option<String>
where
    I: Iterator<Item = &'a str>,
{
    let looks_like_sha = tokens
        .peek()
        .map(|t| t.len() >= 7 && t.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    if looks_like_sha {
        tokens.next().map(String::from)
    } else {
        None
    }
}

fn require_nonempty(value: &str) -> Result<&str, Error> {
    if value.is_empty() {
        Err(Error::MalformedCommand("missing argument".into()))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_comments_without_trigger() {
        assert_eq!(parse("@homu", "alice", "looks good to me").unwrap(), None);
    }

    #[test]
    fn parses_approve() {
        let parsed = parse("@homu", "alice", "@homu r+").unwrap().unwrap();
        assert_eq!(parsed.commands, vec![Command::ApproveSelf { expected_sha: None }]);
    }

    #[test]
    fn parses_approve_as_with_sha() {
        let parsed = parse("@homu", "alice", "@homu r=bob deadbeef1234").unwrap().unwrap();
        assert_eq!(
            parsed.commands,
            vec![Command::ApproveAs {
                user: "bob".into(),
                expected_sha: Some("deadbeef1234".into()),
            }]
        );
    }

    #[test]
    fn parses_multiple_commands_on_one_line() {
        let parsed = parse("@homu", "alice", "@homu r+ p=5 rollup").unwrap().unwrap();
        assert_eq!(
            parsed.commands,
            vec![
                Command::ApproveSelf { expected_sha: None },
                Command::SetPriority(5),
                Command::SetRollup(true),
            ]
        );
    }

    #[test]
    fn unknown_verb_is_ignored_not_an_error() {
        let parsed = parse("@homu", "alice", "@homu frobnicate r+").unwrap().unwrap();
        assert_eq!(parsed.commands, vec![Command::ApproveSelf { expected_sha: None }]);
    }

    #[test]
    fn malformed_priority_rejects_whole_comment() {
        let err = parse("@homu", "alice", "@homu p=notanumber").unwrap_err();
        assert!(matches!(err, Error::MalformedCommand(_)));
    }

    #[test]
    fn empty_delegate_user_is_malformed() {
        let err = parse("@homu", "alice", "@homu delegate=").unwrap_err();
        assert!(matches!(err, Error::MalformedCommand(_)));
    }
}
