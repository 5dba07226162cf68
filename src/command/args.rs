//! Command argument schemas and argv parsing.
//!
//! Each command declares a static list of [`ArgSpec`]s. At parse time the
//! list is turned into a `clap::Command`; argv that clap rejects is a
//! `BadSyntax` error raised before the pipeline runs. Command-chain text is
//! cut at unquoted `|` and each piece is split into words by `shell_words`.

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, ColorChoice};

use crate::{Error, Result};

// ============================================================================
// Schema
// ============================================================================

/// Value type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Boolean switch, takes no value.
    Flag,
    Int,
    Str,
}

/// How many values an argument takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly one (required positional, or last-wins option).
    One,
    /// Zero or one positional.
    Optional,
    /// Repeatable option, or zero or more positionals.
    Many,
}

/// One declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    /// `--long-name` for options, a bare name for positionals.
    pub name: &'static str,
    /// `-d` style alias. Aliases longer than one letter (`-otf`) are
    /// accepted with a single dash as well.
    pub short: Option<&'static str>,
    pub kind: ArgKind,
    pub arity: Arity,
    pub default: Option<&'static str>,
    pub help: &'static str,
}

impl ArgSpec {
    pub const fn flag(name: &'static str, short: Option<&'static str>, help: &'static str) -> Self {
        Self { name, short, kind: ArgKind::Flag, arity: Arity::One, default: None, help }
    }

    pub const fn option(
        name: &'static str,
        short: Option<&'static str>,
        kind: ArgKind,
        default: Option<&'static str>,
        help: &'static str,
    ) -> Self {
        Self { name, short, kind, arity: Arity::One, default, help }
    }

    pub const fn repeated(name: &'static str, short: Option<&'static str>, help: &'static str) -> Self {
        Self { name, short, kind: ArgKind::Str, arity: Arity::Many, default: None, help }
    }

    pub const fn positional(name: &'static str, kind: ArgKind, arity: Arity, help: &'static str) -> Self {
        Self { name, short: None, kind, arity, default: None, help }
    }

    pub fn is_option(&self) -> bool {
        self.name.starts_with('-')
    }

    /// Key under which parsed values are stored: the name without dashes.
    pub fn key(&self) -> &'static str {
        self.name.trim_start_matches('-')
    }

    /// A short alias of more than one letter, without its dash.
    fn word_alias(&self) -> Option<&'static str> {
        self.short
            .map(|s| s.trim_start_matches('-'))
            .filter(|s| s.chars().count() > 1)
    }

    fn metavar(&self) -> String {
        self.key().replace('-', "_").to_uppercase()
    }

    fn to_arg(self) -> Arg {
        let mut arg = Arg::new(self.key()).help(self.help);

        if self.is_option() {
            arg = arg.long(self.key());
            match (self.word_alias(), self.short.and_then(|s| s.trim_start_matches('-').chars().next())) {
                (Some(word), _) => arg = arg.alias(word),
                (None, Some(letter)) => arg = arg.short(letter),
                (None, None) => {}
            }
            arg = match (self.kind, self.arity) {
                (ArgKind::Flag, _) => arg.action(ArgAction::SetTrue),
                (_, Arity::Many) => arg.value_name(self.metavar()).action(ArgAction::Append),
                _ => arg.value_name(self.metavar()).action(ArgAction::Set),
            };
        } else {
            arg = arg.value_name(self.name);
            arg = match self.arity {
                Arity::One => arg.required(true).action(ArgAction::Set),
                Arity::Optional => arg.action(ArgAction::Set),
                Arity::Many => arg.num_args(1..).action(ArgAction::Append),
            };
        }

        if self.kind == ArgKind::Int {
            arg = arg.value_parser(clap::value_parser!(i64)).allow_negative_numbers(true);
        }
        if let Some(default) = self.default {
            arg = arg.default_value(default);
        }
        arg
    }
}

/// A registered command: name, one-line brief, long description, schema.
#[derive(Debug, Clone, Copy)]
pub struct CmdDef {
    pub name: &'static str,
    pub brief: &'static str,
    pub descr: &'static str,
    pub args: &'static [ArgSpec],
}

impl CmdDef {
    /// The clap form of this command. argv is expected without the
    /// command name.
    pub fn command(&self) -> clap::Command {
        self.args.iter().fold(
            clap::Command::new(self.name)
                .about(self.descr)
                .no_binary_name(true)
                .disable_version_flag(true)
                .infer_long_args(true)
                .args_override_self(true)
                .color(ColorChoice::Never)
                .help_template("{usage-heading} {usage}\n\n{about-with-newline}\n{all-args}"),
            |cmd, spec| cmd.arg(spec.to_arg()),
        )
    }

    /// Rendered help: usage line, description, arguments.
    pub fn usage(&self) -> String {
        self.command().render_help().to_string()
    }

    /// Parse an argv (command name excluded) against this schema.
    pub fn parse(&self, argv: &[String]) -> Result<ParsedArgs> {
        let argv = argv.iter().map(|token| self.expand_word_alias(token));
        self.command()
            .try_get_matches_from(argv)
            .map(|matches| ParsedArgs { matches })
            .map_err(|err| self.syntax_error(err))
    }

    /// clap only knows one-letter shorts, so `-otf x` is rewritten to
    /// `--otf x`, where `otf` is a long alias.
    fn expand_word_alias(&self, token: &str) -> String {
        if token.starts_with('-') && !token.starts_with("--") {
            let head = token.split_once('=').map_or(token, |(head, _)| head);
            if self.args.iter().any(|s| s.word_alias().is_some() && s.short == Some(head)) {
                return format!("-{token}");
            }
        }
        token.to_string()
    }

    fn syntax_error(&self, err: clap::Error) -> Error {
        let text = err.to_string();
        let message = match err.kind() {
            ErrorKind::DisplayHelp => text,
            _ => text
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ")
                .to_string(),
        };
        Error::syntax(self.name, message)
    }
}

// ============================================================================
// Parsed values
// ============================================================================

/// Parsed arguments keyed by [`ArgSpec::key`].
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    matches: ArgMatches,
}

impl ParsedArgs {
    pub fn flag(&self, key: &str) -> bool {
        self.matches.try_get_one::<bool>(key).ok().flatten().copied().unwrap_or(false)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.matches.try_get_one::<i64>(key).ok().flatten().copied()
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.matches.try_get_one::<String>(key).ok().flatten().map(String::as_str)
    }

    pub fn strs(&self, key: &str) -> Vec<String> {
        self.matches
            .try_get_many::<String>(key)
            .ok()
            .flatten()
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Command-chain text
// ============================================================================

/// Split `cmd a b | cmd2 "c d"` into one argv per command.
pub fn split_pipeline(text: &str) -> Result<Vec<Vec<String>>> {
    let segments = pipe_segments(text);
    let mut cmds = Vec::with_capacity(segments.len());
    for segment in &segments {
        let argv = shell_words::split(segment).map_err(|e| Error::syntax("query", e.to_string()))?;
        if argv.is_empty() {
            if segments.len() > 1 {
                return Err(Error::syntax("query", "empty command in pipeline"));
            }
            continue;
        }
        cmds.push(argv);
    }
    Ok(cmds)
}

/// Cut `text` at every `|` outside quotes. Word splitting is left to
/// `shell_words`.
fn pipe_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            escaped = false;
            cur.push(c);
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '|') => {
                segments.push(std::mem::take(&mut cur));
                continue;
            }
            // shell_words reads a word-leading `#` as a comment; tags start with one.
            (None, '#') => cur.push('\\'),
            (None, _) => {}
        }
        cur.push(c);
    }
    segments.push(cur);
    segments
}
