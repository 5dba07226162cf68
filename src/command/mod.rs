//! # Commands
//!
//! A command is one stage of a pipeline. Each takes the upstream
//! [`NodeStream`] and returns its own, pulling upstream only as far as its
//! consumer pulls it.
//!
//! | Command | Module | Output |
//! |---------|--------|--------|
//! | `help` | `basic` | upstream, then prints the command list |
//! | `limit` | `basic` | at most N upstream nodes |
//! | `uniq` | `basic` | first occurrence of each node |
//! | `delnode` | `basic` | nothing (deletes upstream nodes) |
//! | `sudo` | `basic` | upstream, with the runtime elevated |
//! | `count` | `basic` | upstream, then prints the count |
//! | `spin` | `basic` | nothing (drains upstream) |
//! | `iden` | `basic` | upstream, then nodes lifted by buid |
//! | `reindex` | `basic` | nothing with `--type`, otherwise upstream |
//! | `movetag` | `movetag` | upstream, after renaming a tag tree |
//! | `noderefs` | `noderefs` | nodes within N hops of each upstream node |

pub mod args;
mod basic;
pub mod movetag;
pub mod noderefs;

pub use args::{ArgKind, ArgSpec, Arity, CmdDef, ParsedArgs};
pub use movetag::MoveTag;
pub use noderefs::NodeRefs;

use crate::execution::NodeStream;
use crate::runtime::Runtime;
use crate::{Error, Result};

/// Every registered command, in registration order.
pub static COMMANDS: &[CmdDef] = &[
    basic::HELP,
    basic::LIMIT,
    basic::UNIQ,
    basic::DELNODE,
    basic::SUDO,
    basic::COUNT,
    basic::SPIN,
    basic::IDEN,
    basic::REINDEX,
    movetag::DEF,
    noderefs::DEF,
];

/// Look up a registered command by name.
pub fn lookup(name: &str) -> Option<&'static CmdDef> {
    COMMANDS.iter().find(|def| def.name == name)
}

/// A parsed, validated pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the command list, or one command's usage.
    Help(Option<String>),
    Limit(usize),
    Uniq,
    DelNode { force: bool },
    Sudo,
    Count,
    Spin,
    /// Hex-encoded buids to lift after upstream is exhausted.
    Iden(Vec<String>),
    /// Store again every form and property of a type, or re-set the
    /// properties of upstream nodes with `subs`.
    ReIndex { kind: Option<String>, subs: bool },
    MoveTag(MoveTag),
    NodeRefs(NodeRefs),
}

impl Command {
    /// Build a command from its name and argv. Unknown commands and
    /// malformed arguments fail with `BadSyntax`.
    pub fn parse(name: &str, argv: &[String]) -> Result<Self> {
        let def = lookup(name)
            .ok_or_else(|| Error::syntax("query", format!("no such command: {name}")))?;
        let args = def.parse(argv)?;

        let cmd = match def.name {
            "help" => {
                let command = args.str("command").map(String::from);
                if let Some(want) = &command {
                    if lookup(want).is_none() {
                        return Err(Error::syntax("help", format!("no such command: {want}")));
                    }
                }
                Command::Help(command)
            }
            "limit" => {
                let count = args.int("count").unwrap_or_default();
                let count = usize::try_from(count).map_err(|_| Error::BadOperArg {
                    arg: "count".into(),
                    message: format!("must not be negative, got {count}"),
                })?;
                Command::Limit(count)
            }
            "uniq" => Command::Uniq,
            "delnode" => Command::DelNode { force: args.flag("force") },
            "sudo" => Command::Sudo,
            "count" => Command::Count,
            "spin" => Command::Spin,
            "iden" => Command::Iden(args.strs("iden")),
            "reindex" => Command::ReIndex {
                kind: args.str("type").map(String::from),
                subs: args.flag("subs"),
            },
            "movetag" => Command::MoveTag(MoveTag::from_args(&args)?),
            "noderefs" => Command::NodeRefs(NodeRefs::from_args(&args)?),
            other => return Err(Error::syntax("query", format!("no such command: {other}"))),
        };
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Help(_) => "help",
            Command::Limit(_) => "limit",
            Command::Uniq => "uniq",
            Command::DelNode { .. } => "delnode",
            Command::Sudo => "sudo",
            Command::Count => "count",
            Command::Spin => "spin",
            Command::Iden(_) => "iden",
            Command::ReIndex { .. } => "reindex",
            Command::MoveTag(_) => "movetag",
            Command::NodeRefs(_) => "noderefs",
        }
    }

    /// The registry entry for this command.
    pub fn def(&self) -> Option<&'static CmdDef> {
        lookup(self.name())
    }

    /// Wrap `input` in this command's stage.
    pub fn run<'q>(&'q self, runt: &'q Runtime<'q>, input: NodeStream<'q>) -> NodeStream<'q> {
        match self {
            Command::Help(command) => basic::help(runt, command.as_deref(), input),
            Command::Limit(count) => basic::limit(runt, *count, input),
            Command::Uniq => basic::uniq(input),
            Command::DelNode { force } => basic::delnode(runt, *force, input),
            Command::Sudo => basic::sudo(runt, input),
            Command::Count => basic::count(runt, input),
            Command::Spin => basic::spin(runt, input),
            Command::Iden(idens) => basic::iden(runt, idens, input),
            Command::ReIndex { kind, subs } => basic::reindex(runt, kind.as_deref(), *subs, input),
            Command::MoveTag(movetag) => movetag.run(runt, input),
            Command::NodeRefs(refs) => refs.run(runt, input),
        }
    }
}
