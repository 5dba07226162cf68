//! Small pipeline stages.

use hashbrown::HashSet;
use tracing::debug;

use super::args::{ArgKind, ArgSpec, Arity, CmdDef};
use super::COMMANDS;
use crate::execution::{self, NodeStream};
use crate::model::tag;
use crate::model::*;
use crate::runtime::Runtime;
use crate::storage::{Cmpr, Selector, Snap};
use crate::Result;

pub const HELP: CmdDef = CmdDef {
    name: "help",
    brief: "List available commands and a brief description for each.",
    descr: "List available commands and a brief description for each.\n\n\
            Example:\n\n    help\n    help noderefs",
    args: &[ArgSpec::positional(
        "command",
        ArgKind::Str,
        Arity::Optional,
        "Show the usage of a given command.",
    )],
};

pub const LIMIT: CmdDef = CmdDef {
    name: "limit",
    brief: "Limit the number of nodes passed on by the query at this position.",
    descr: "Limit the number of nodes passed on by the query at this position.\n\n\
            Example:\n\n    limit 10",
    args: &[ArgSpec::positional(
        "count",
        ArgKind::Int,
        Arity::One,
        "The maximum number of nodes to yield.",
    )],
};

pub const UNIQ: CmdDef = CmdDef {
    name: "uniq",
    brief: "Filter nodes so each buid passes at most once.",
    descr: "Filter nodes so each buid passes at most once.\n\n\
            Example:\n\n    noderefs -d 3 | uniq",
    args: &[],
};

pub const DELNODE: CmdDef = CmdDef {
    name: "delnode",
    brief: "Delete the nodes produced by the previous stages.",
    descr: "Delete the nodes produced by the previous stages. No nodes are yielded.\n\n\
            Example:\n\n    iden <buid> | delnode",
    args: &[ArgSpec::flag(
        "--force",
        None,
        "Delete even if it leaves broken references (requires admin).",
    )],
};

pub const SUDO: CmdDef = CmdDef {
    name: "sudo",
    brief: "Use admin privileges to bypass permission checks for the rest of the query.",
    descr: "Use admin privileges to bypass permission checks for the rest of the query.\n\n\
            Example:\n\n    sudo | delnode",
    args: &[],
};

pub const COUNT: CmdDef = CmdDef {
    name: "count",
    brief: "Print the number of nodes that passed through, yielding them unchanged.",
    descr: "Print the number of nodes that passed through, yielding them unchanged.\n\n\
            Example:\n\n    noderefs | count",
    args: &[],
};

pub const SPIN: CmdDef = CmdDef {
    name: "spin",
    brief: "Pull every node through the query without yielding any.",
    descr: "Pull every node through the query without yielding any. Useful when \
            earlier stages act on nodes and the nodes themselves are not wanted.\n\n\
            Example:\n\n    movetag foo bar | spin",
    args: &[],
};

pub const IDEN: CmdDef = CmdDef {
    name: "iden",
    brief: "Lift nodes by buid.",
    descr: "Lift nodes by hex-encoded buid after the upstream nodes.\n\n\
            Example:\n\n    iden b25bc9eec7e159dce879f9ec85fb791f83b505ac55b346fcb64c3c51e98d1175 | count",
    args: &[ArgSpec::positional(
        "iden",
        ArgKind::Str,
        Arity::Many,
        "Iden to lift nodes by. May be given more than once.",
    )],
};

pub const REINDEX: CmdDef = CmdDef {
    name: "reindex",
    brief: "Use admin privileges to re-index or re-normalize node properties.",
    descr: "Use admin privileges to re-index or re-normalize node properties.\n\n\
            With --type, every form and property of that type is stored again and \
            no nodes are yielded. Without it, upstream nodes pass through; with \
            --subs their properties are set again on the way.\n\n\
            Examples:\n\n    reindex --type inet:ipv4\n    noderefs | reindex --subs",
    args: &[
        ArgSpec::option("--type", None, ArgKind::Str, None,
            "Re-index all properties of a specified type."),
        ArgSpec::flag("--subs", None, "Re-parse and set sub props."),
    ],
};

// ============================================================================
// help
// ============================================================================

pub fn help<'q>(runt: &'q Runtime<'q>, command: Option<&'q str>, input: NodeStream<'q>) -> NodeStream<'q> {
    execution::on_exhausted(input, move || {
        match command.and_then(super::lookup) {
            Some(def) => {
                for line in def.usage().lines() {
                    runt.printf(line);
                }
            }
            None => {
                let mut defs: Vec<&CmdDef> = COMMANDS.iter().collect();
                defs.sort_by_key(|d| d.name);
                for def in defs {
                    runt.printf(format!("{:.20}: {}", def.name, def.brief));
                }
            }
        }
        runt.printf("");
        runt.printf("For detailed help on any command, use <cmd> --help");
    })
}

// ============================================================================
// limit
// ============================================================================

pub fn limit<'q>(runt: &'q Runtime<'q>, count: usize, input: NodeStream<'q>) -> NodeStream<'q> {
    Box::new(Limit { runt, inner: input, count, left: count, done: false })
}

/// Yields at most `count` nodes. Upstream is never pulled past the limit.
struct Limit<'q> {
    runt: &'q Runtime<'q>,
    inner: NodeStream<'q>,
    count: usize,
    left: usize,
    done: bool,
}

impl Iterator for Limit<'_> {
    type Item = Result<(Node, Path)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.left == 0 {
            self.done = true;
            self.runt.printf(format!("limit reached: {}", self.count));
            return None;
        }
        let item = self.inner.next();
        match &item {
            Some(Ok(_)) => self.left -= 1,
            Some(Err(_)) | None => self.done = true,
        }
        item
    }
}

// ============================================================================
// uniq
// ============================================================================

pub fn uniq<'q>(input: NodeStream<'q>) -> NodeStream<'q> {
    let mut seen: HashSet<Buid> = HashSet::new();
    Box::new(input.filter(move |item| match item {
        Ok((node, _)) => seen.insert(node.buid),
        Err(_) => true,
    }))
}

// ============================================================================
// delnode
// ============================================================================

pub fn delnode<'q>(runt: &'q Runtime<'q>, force: bool, input: NodeStream<'q>) -> NodeStream<'q> {
    let deleting = execution::drain(runt, input, move |node, _| {
        for name in node.tags.keys() {
            let mut perm = vec!["tag:del"];
            perm.extend(tag::segments(name));
            runt.allowed(&perm)?;
        }
        runt.allowed(&["node:del", node.form.as_str()])?;
        runt.snap().delete_node(&node.buid, force)?;
        Ok(())
    });

    execution::on_first_pull(
        move || if force { runt.require_admin("delnode --force") } else { Ok(()) },
        deleting,
    )
}

// ============================================================================
// sudo
// ============================================================================

pub fn sudo<'q>(runt: &'q Runtime<'q>, input: NodeStream<'q>) -> NodeStream<'q> {
    execution::on_first_pull(move || runt.elevate(), input)
}

// ============================================================================
// count
// ============================================================================

pub fn count<'q>(runt: &'q Runtime<'q>, input: NodeStream<'q>) -> NodeStream<'q> {
    Box::new(Count { runt, inner: input, seen: 0, done: false })
}

struct Count<'q> {
    runt: &'q Runtime<'q>,
    inner: NodeStream<'q>,
    seen: usize,
    done: bool,
}

impl Iterator for Count<'_> {
    type Item = Result<(Node, Path)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(item)) => {
                self.seen += 1;
                Some(Ok(item))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                self.runt.printf(format!("Counted {} nodes.", self.seen));
                None
            }
        }
    }
}

// ============================================================================
// spin
// ============================================================================

pub fn spin<'q>(runt: &'q Runtime<'q>, input: NodeStream<'q>) -> NodeStream<'q> {
    execution::drain(runt, input, |_, _| Ok(()))
}

// ============================================================================
// iden
// ============================================================================

pub fn iden<'q>(runt: &'q Runtime<'q>, idens: &'q [String], input: NodeStream<'q>) -> NodeStream<'q> {
    let lifted = idens.iter().filter_map(move |iden| {
        let Ok(bytes) = hex::decode(iden) else {
            runt.warn(format!("Failed to decode iden: [{iden}]"));
            return None;
        };
        // Well-formed hex of the wrong length can't name a node.
        let buid = Buid(bytes.try_into().ok()?);
        let node = runt.snap().node_by_buid(&buid)?;
        let path = runt.init_path(node.clone());
        Some(Ok((node, path)))
    });
    Box::new(input.chain(lifted))
}

// ============================================================================
// reindex
// ============================================================================

/// Without admin rights the stage warns and yields nothing. Everything
/// happens on the first pull.
pub fn reindex<'q>(
    runt: &'q Runtime<'q>,
    kind: Option<&'q str>,
    subs: bool,
    input: NodeStream<'q>,
) -> NodeStream<'q> {
    let stage = std::iter::once_with(move || -> NodeStream<'q> {
        if runt.require_admin("reindex").is_err() {
            runt.warn("reindex requires an admin");
            return Box::new(std::iter::empty());
        }
        if let Err(e) = runt.elevate() {
            return Box::new(std::iter::once(Err(e)));
        }
        match kind {
            Some(kind) => match reindex_type(runt, kind) {
                Ok(()) => Box::new(std::iter::empty()),
                Err(e) => Box::new(std::iter::once(Err(e))),
            },
            None if subs => Box::new(input.map(move |item| {
                let (node, path) = item?;
                Ok((restore_props(runt.snap(), &node)?, path))
            })),
            None => input,
        }
    });
    Box::new(stage.flatten())
}

/// Store again every node of form `kind` and every property typed `kind`.
fn reindex_type(runt: &Runtime<'_>, kind: &str) -> Result<()> {
    let snap = runt.snap();
    let model = runt.model();

    if model.form(kind).is_some() {
        runt.printf(format!("reindex form: {kind}"));
        let mut count = 0usize;
        for node in snap.nodes_by(&Selector::form(kind), None, Cmpr::Eq) {
            runt.tick()?;
            snap.add_node(&node.form, node.value.clone())?;
            count += 1;
        }
        debug!(form = kind, count, "reindexed form");
    }

    for prop in model.props_by_type(kind) {
        runt.printf(format!("reindex prop: {}", prop.full));
        let mut count = 0usize;
        for node in snap.nodes_by(&Selector::prop(prop.full.as_str()), None, Cmpr::Eq) {
            runt.tick()?;
            if let Some(value) = node.get(&prop.name) {
                snap.set_prop(&node.buid, &prop.name, value.clone())?;
                count += 1;
            }
        }
        debug!(prop = %prop.full, count, "reindexed prop");
    }
    Ok(())
}

/// Set every property of `node` again, returning the stored node.
fn restore_props(snap: &dyn Snap, node: &Node) -> Result<Node> {
    node.props
        .iter()
        .try_fold(node.clone(), |_, (name, value)| snap.set_prop(&node.buid, name, value.clone()))
}
