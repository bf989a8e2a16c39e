//! Intent router: turns a free-form chat line into a typed [`Command`].
//!
//! Recognized prefixes are matched case-insensitively, most specific first:
//!
//! | Prefix | Kind |
//! |--------|------|
//! | `summarize arxiv:` | [`CommandKind::SummarizeArxiv`] |
//! | `search arxiv:` | [`CommandKind::SearchArxiv`] |
//! | `search kb:` | [`CommandKind::SearchKb`] |
//! | `add to kb:` | [`CommandKind::AddToKb`] |
//! | `check kb` | [`CommandKind::CheckKb`] |
//! | `perplexity:` | [`CommandKind::Perplexity`] |
//!
//! Words of a prefix may be separated by any run of whitespace, and
//! whitespace before the colon is accepted. Anything else is
//! [`CommandKind::Chat`] carrying the unmodified line. Parsing cannot fail.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SearchArxiv,
    SummarizeArxiv,
    SearchKb,
    AddToKb,
    CheckKb,
    Perplexity,
    Chat,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SearchArxiv => "search_arxiv",
            CommandKind::SummarizeArxiv => "summarize_arxiv",
            CommandKind::SearchKb => "search_kb",
            CommandKind::AddToKb => "add_to_kb",
            CommandKind::CheckKb => "check_kb",
            CommandKind::Perplexity => "perplexity",
            CommandKind::Chat => "chat",
        }
    }

    /// The chat syntax that produces this kind, for usage messages.
    pub fn usage(&self) -> &'static str {
        match self {
            CommandKind::SearchArxiv => "search arxiv: <query>",
            CommandKind::SummarizeArxiv => "summarize arxiv: <paper id>",
            CommandKind::SearchKb => "search kb: <query>",
            CommandKind::AddToKb => "add to kb: <paper id>",
            CommandKind::CheckKb => "check kb [details]",
            CommandKind::Perplexity => "perplexity: <question>",
            CommandKind::Chat => "<anything else>",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed user instruction. Created per turn, discarded after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub argument: String,
}

impl Command {
    pub fn new(kind: CommandKind, argument: impl Into<String>) -> Self {
        Self {
            kind,
            argument: argument.into(),
        }
    }

    /// `check kb details` / `check kb full` ask for the long statistics form.
    pub fn wants_details(&self) -> bool {
        let arg = self.argument.to_lowercase();
        arg.contains("detail") || arg.contains("full")
    }
}

/// How a prefix ends once its words have matched.
#[derive(Clone, Copy)]
enum Terminator {
    /// A colon is required (whitespace before it is allowed).
    Colon,
    /// End of input, whitespace, or an optional colon.
    Word,
}

struct Prefix {
    words: &'static [&'static str],
    terminator: Terminator,
    kind: CommandKind,
}

/// Priority order matters: more specific prefixes come first.
const PREFIXES: &[Prefix] = &[
    Prefix {
        words: &["summarize", "arxiv"],
        terminator: Terminator::Colon,
        kind: CommandKind::SummarizeArxiv,
    },
    Prefix {
        words: &["search", "arxiv"],
        terminator: Terminator::Colon,
        kind: CommandKind::SearchArxiv,
    },
    Prefix {
        words: &["search", "kb"],
        terminator: Terminator::Colon,
        kind: CommandKind::SearchKb,
    },
    Prefix {
        words: &["add", "to", "kb"],
        terminator: Terminator::Colon,
        kind: CommandKind::AddToKb,
    },
    Prefix {
        words: &["check", "kb"],
        terminator: Terminator::Word,
        kind: CommandKind::CheckKb,
    },
    Prefix {
        words: &["perplexity"],
        terminator: Terminator::Colon,
        kind: CommandKind::Perplexity,
    },
];

/// Parse a chat line. First matching prefix wins; no match is [`CommandKind::Chat`].
pub fn parse(line: &str) -> Command {
    for prefix in PREFIXES {
        if let Some(rest) = match_prefix(line, prefix) {
            return Command::new(prefix.kind, rest.trim());
        }
    }
    Command::new(CommandKind::Chat, line)
}

fn match_prefix<'a>(line: &'a str, prefix: &Prefix) -> Option<&'a str> {
    let mut rest = line.trim_start();
    for (i, word) in prefix.words.iter().enumerate() {
        if i > 0 {
            let trimmed = rest.trim_start();
            if trimmed.len() == rest.len() {
                // words must be separated by whitespace
                return None;
            }
            rest = trimmed;
        }
        rest = strip_word(rest, word)?;
    }

    match prefix.terminator {
        Terminator::Colon => rest.trim_start().strip_prefix(':'),
        Terminator::Word => {
            let trimmed = rest.trim_start();
            if let Some(after_colon) = trimmed.strip_prefix(':') {
                Some(after_colon)
            } else if trimmed.is_empty() || trimmed.len() < rest.len() {
                Some(trimmed)
            } else {
                None
            }
        }
    }
}

/// Case-insensitive ASCII prefix strip. The matched word must not be
/// immediately followed by another alphanumeric character.
fn strip_word<'a>(input: &'a str, word: &str) -> Option<&'a str> {
    let head = input.get(..word.len())?;
    if !head.eq_ignore_ascii_case(word) {
        return None;
    }
    let rest = &input[word.len()..];
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() => None,
        _ => Some(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_every_prefix() {
        let cases = [
            ("search arxiv: quantum bitcoin", CommandKind::SearchArxiv, "quantum bitcoin"),
            ("summarize arxiv: 2106.12345", CommandKind::SummarizeArxiv, "2106.12345"),
            ("search kb: bitcoin", CommandKind::SearchKb, "bitcoin"),
            ("add to kb: 2106.12345", CommandKind::AddToKb, "2106.12345"),
            ("check kb", CommandKind::CheckKb, ""),
            ("perplexity: price of btc", CommandKind::Perplexity, "price of btc"),
        ];
        for (line, kind, arg) in cases {
            let cmd = parse(line);
            assert_eq!(cmd.kind, kind, "line: {}", line);
            assert_eq!(cmd.argument, arg, "line: {}", line);
        }
    }

    #[test]
    fn prefixes_are_case_insensitive() {
        assert_eq!(parse("SEARCH ArXiv: Lattices").kind, CommandKind::SearchArxiv);
        assert_eq!(parse("Search ArXiv: Lattices").argument, "Lattices");
        assert_eq!(parse("Check KB").kind, CommandKind::CheckKb);
        assert_eq!(parse("PERPLEXITY:x").argument, "x");
    }

    #[test]
    fn whitespace_is_flexible() {
        let cmd = parse("   search \t  kb  :   taproot   ");
        assert_eq!(cmd.kind, CommandKind::SearchKb);
        assert_eq!(cmd.argument, "taproot");

        let cmd = parse("add  to\tkb:2106.1");
        assert_eq!(cmd.kind, CommandKind::AddToKb);
        assert_eq!(cmd.argument, "2106.1");
    }

    #[test]
    fn argument_may_be_empty() {
        let cmd = parse("search arxiv:");
        assert_eq!(cmd.kind, CommandKind::SearchArxiv);
        assert_eq!(cmd.argument, "");
    }

    #[test]
    fn search_kb_is_not_absorbed_by_arxiv() {
        assert_eq!(parse("search kb: arxiv papers").kind, CommandKind::SearchKb);
        assert_eq!(parse("search arxiv: kb").kind, CommandKind::SearchArxiv);
    }

    #[test]
    fn check_kb_accepts_details_and_colon() {
        let cmd = parse("check kb details");
        assert_eq!(cmd.kind, CommandKind::CheckKb);
        assert_eq!(cmd.argument, "details");
        assert!(cmd.wants_details());

        let cmd = parse("check kb: full");
        assert_eq!(cmd.argument, "full");
        assert!(cmd.wants_details());

        assert!(!parse("check kb").wants_details());
    }

    #[test]
    fn near_misses_fall_back_to_chat() {
        for line in [
            "searching arxiv: x",
            "search arxivs: x",
            "search arxiv x",
            "searcharxiv: x",
            "check kbx",
            "what is in my kb?",
            "perplexity is a metric",
            "",
        ] {
            let cmd = parse(line);
            assert_eq!(cmd.kind, CommandKind::Chat, "line: {:?}", line);
            assert_eq!(cmd.argument, line);
        }
    }

    #[test]
    fn chat_keeps_the_full_unmodified_line() {
        let line = "  Tell me about Bitcoin halvings  ";
        let cmd = parse(line);
        assert_eq!(cmd.kind, CommandKind::Chat);
        assert_eq!(cmd.argument, line);
    }

    #[test]
    fn non_ascii_input_does_not_panic() {
        assert_eq!(parse("séarch kb: x").kind, CommandKind::Chat);
        assert_eq!(parse("ü").kind, CommandKind::Chat);
        let cmd = parse("search kb: über");
        assert_eq!(cmd.argument, "über");
    }
}
