//! `noderefs`: nodes within N hops of each input node.
//!
//! ## Adjacency
//!
//! A node's neighbours are found three ways:
//!
//! 1. **pivot-out**: its own properties that point at nodes. `ndef` values
//!    name a node directly, `nodeprop` values name a `(prop, value)` pair to
//!    lift by, and a property typed with a form names `(type, value)`.
//! 2. **pivot-in**: nodes with a property typed as this node's form whose
//!    value equals this node's primary value.
//! 3. **ndef refs**: nodes with an `ndef` property naming this node. With
//!    `--traverse-edge`, an edge node is stepped across to its other end.
//!
//! ## Walk
//!
//! Each input is walked in rounds, one round per degree. Within a round
//! the queue is drained last-in first-out; every new node found is yielded
//! and, unless it is excluded from traversal, queued for the next round.
//! A node is never yielded twice within one visited scope: per input by
//! default, across all inputs with `--unique`.

use hashbrown::HashSet;
use tracing::{debug, warn};

use super::args::{ArgKind, ArgSpec, CmdDef, ParsedArgs};
use crate::execution::{self, NodeStream};
use crate::model::schema::{PropKind, EDGE_N1, EDGE_N2};
use crate::model::tag;
use crate::model::*;
use crate::runtime::Runtime;
use crate::storage::{Cmpr, NodeIter, Selector, Snap};
use crate::{Error, Result};

pub const DEF: CmdDef = CmdDef {
    name: "noderefs",
    brief: "Get nodes adjacent to inbound nodes, up to n degrees away.",
    descr: "Get nodes adjacent to inbound nodes, up to n degrees away.\n\n\
            Examples:\n\n\
            \x20   noderefs                      nodes one hop away\n\
            \x20   noderefs --join --degrees 3   up to three hops, with the source\n\
            \x20   noderefs -of inet:dns:a       skip dns:a nodes entirely\n\
            \x20   noderefs -otf inet:dns:a      yield dns:a nodes but stop there\n\
            \x20   noderefs -d 4 --unique        one visited set for all inputs",
    args: &[
        ArgSpec::option("--degrees", Some("-d"), ArgKind::Int, Some("1"),
            "Number of degrees to traverse from the source node."),
        ArgSpec::flag("--traverse-edge", Some("-te"),
            "Step across edge nodes to their opposite side."),
        ArgSpec::flag("--join", Some("-j"),
            "Include source nodes in the output."),
        ArgSpec::repeated("--omit-traversal-form", Some("-otf"),
            "Form not to traverse across. Nodes of the form are still yielded."),
        ArgSpec::repeated("--omit-traversal-tag", Some("-ott"),
            "Tag not to traverse across. Nodes with the tag are still yielded."),
        ArgSpec::repeated("--omit-form", Some("-of"),
            "Form neither yielded nor traversed."),
        ArgSpec::repeated("--omit-tag", Some("-ot"),
            "Tag whose nodes are neither yielded nor traversed."),
        ArgSpec::flag("--unique", Some("-u"),
            "Unique the output across all input nodes, not per input node."),
    ],
};

/// Options of one `noderefs` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRefs {
    pub degrees: i64,
    pub traverse_edge: bool,
    pub join: bool,
    pub unique: bool,
    pub omit_forms: HashSet<String>,
    pub omit_tags: HashSet<String>,
    pub omit_traversal_forms: HashSet<String>,
    pub omit_traversal_tags: HashSet<String>,
}

impl Default for NodeRefs {
    fn default() -> Self {
        Self::new(1)
    }
}

impl NodeRefs {
    pub fn new(degrees: i64) -> Self {
        Self {
            degrees,
            traverse_edge: false,
            join: false,
            unique: false,
            omit_forms: HashSet::new(),
            omit_tags: HashSet::new(),
            omit_traversal_forms: HashSet::new(),
            omit_traversal_tags: HashSet::new(),
        }
    }

    pub fn join(mut self) -> Self {
        self.join = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn traverse_edge(mut self) -> Self {
        self.traverse_edge = true;
        self
    }

    pub fn omit_form(mut self, form: &str) -> Self {
        self.omit_forms.insert(form.to_string());
        self
    }

    pub fn omit_tag(mut self, name: &str) -> Self {
        self.omit_tags.insert(name.trim_start_matches('#').to_string());
        self
    }

    pub fn omit_traversal_form(mut self, form: &str) -> Self {
        self.omit_traversal_forms.insert(form.to_string());
        self
    }

    pub fn omit_traversal_tag(mut self, name: &str) -> Self {
        self.omit_traversal_tags.insert(name.trim_start_matches('#').to_string());
        self
    }

    pub(crate) fn from_args(args: &ParsedArgs) -> Result<Self> {
        let tags = |key: &str| -> Result<HashSet<String>> {
            args.strs(key)
                .iter()
                .map(|t| tag::norm(t).map_err(|e| Error::syntax("noderefs", e.to_string())))
                .collect()
        };
        Ok(Self {
            degrees: args.int("degrees").unwrap_or(1),
            traverse_edge: args.flag("traverse-edge"),
            join: args.flag("join"),
            unique: args.flag("unique"),
            omit_forms: args.strs("omit-form").into_iter().collect(),
            omit_tags: tags("omit-tag")?,
            omit_traversal_forms: args.strs("omit-traversal-form").into_iter().collect(),
            omit_traversal_tags: tags("omit-traversal-tag")?,
        })
    }

    /// Excluded from output and traversal.
    fn omits(&self, node: &Node) -> bool {
        self.omit_forms.contains(&node.form) || node.tagged_any(&self.omit_tags)
    }

    /// Yielded, but its neighbours are not explored.
    fn stops_at(&self, node: &Node) -> bool {
        self.omit_traversal_forms.contains(&node.form) || node.tagged_any(&self.omit_traversal_tags)
    }

    pub fn run<'q>(&'q self, runt: &'q Runtime<'q>, input: NodeStream<'q>) -> NodeStream<'q> {
        let walk = RefsWalk {
            cmd: self,
            snap: runt.snap(),
            input,
            visited: HashSet::new(),
            walk: None,
        };

        let degrees = self.degrees;
        execution::on_first_pull(
            move || {
                if degrees < 1 {
                    return Err(Error::BadOperArg {
                        arg: "degrees".into(),
                        message: "degrees must be greater than or equal to 1".into(),
                    });
                }
                Ok(())
            },
            Box::new(walk),
        )
    }

    /// Every node adjacent to `src`, each with `path` forked by one hop.
    ///
    /// Lazy: no storage lookup happens until the result is pulled.
    fn refs_of<'q>(&'q self, snap: &'q dyn Snap, src: Node, path: Path) -> Box<dyn Iterator<Item = (Node, Path)> + 'q> {
        let model = snap.model();
        let src_ndef = src.ndef();

        // pivot-out
        let form = src.form.clone();
        let out = src.props.into_iter().flat_map(move |(name, value)| -> NodeIter<'q> {
            let Some(prop) = model.form_prop(&form, &name) else {
                warn!(form = %form, prop = %name, "node property missing from model");
                return Box::new(std::iter::empty());
            };
            match prop.kind {
                PropKind::Ndef => Box::new(value.as_ndef().and_then(|n| snap.node_by_ndef(n)).into_iter()),
                PropKind::NodeProp => match &value {
                    Value::List(pair) => match pair.as_slice() {
                        [Value::Str(full), want] => snap.nodes_by(&Selector::prop(full.as_str()), Some(want), Cmpr::Eq),
                        _ => Box::new(std::iter::empty()),
                    },
                    _ => Box::new(std::iter::empty()),
                },
                PropKind::Form => {
                    let target = Ndef::new(prop.type_name.as_str(), value);
                    Box::new(snap.node_by_ndef(&target).into_iter())
                }
                PropKind::Plain => Box::new(std::iter::empty()),
            }
        });

        // pivot-in
        let primary = src.value;
        let inbound = model.props_by_type(&src.form).flat_map(move |prop| {
            snap.nodes_by(&Selector::prop(prop.full.as_str()), Some(&primary), Cmpr::Eq)
        });

        // ndef refs
        let traverse_edge = self.traverse_edge;
        let as_value = Value::from(src_ndef.clone());
        let by_ndef = model.ndef_props().flat_map(move |prop| {
            let src_ndef = src_ndef.clone();
            snap.nodes_by(&Selector::prop(prop.full.as_str()), Some(&as_value), Cmpr::Eq)
                .filter_map(move |pivo| {
                    if traverse_edge && model.is_edge(&pivo.form) {
                        return far_side(snap, &pivo, &src_ndef);
                    }
                    Some(pivo)
                })
        });

        Box::new(out.chain(inbound).chain(by_ndef).map(move |node| {
            let next = path.fork(node.clone());
            (node, next)
        }))
    }
}

/// The endpoint of `edge` opposite `src`.
fn far_side(snap: &dyn Snap, edge: &Node, src: &Ndef) -> Option<Node> {
    let end = |name| edge.get(name).and_then(Value::as_ndef);
    let far = if end(EDGE_N1) == Some(src) {
        EDGE_N2
    } else if end(EDGE_N2) == Some(src) {
        EDGE_N1
    } else {
        warn!(edge = %edge.buid, "edge has no n1/n2 reference to its source");
        return None;
    };

    let node = end(far).and_then(|ndef| snap.node_by_ndef(ndef));
    if node.is_none() {
        warn!(edge = %edge.buid, end = far, "edge endpoint does not exist");
    }
    node
}

// ============================================================================
// Walk
// ============================================================================

/// Walk state for the input node currently being expanded.
struct Walk<'q> {
    /// Rounds still to run after the current one.
    rounds_left: i64,
    current: Vec<(Node, Path)>,
    next_round: Vec<(Node, Path)>,
    refs: Option<Box<dyn Iterator<Item = (Node, Path)> + 'q>>,
}

struct RefsWalk<'q> {
    cmd: &'q NodeRefs,
    snap: &'q dyn Snap,
    input: NodeStream<'q>,
    visited: HashSet<Buid>,
    walk: Option<Walk<'q>>,
}

impl<'q> Iterator for RefsWalk<'q> {
    type Item = Result<(Node, Path)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(walk) = self.walk.as_mut() {
                if let Some((node, path)) = walk.refs.as_mut().and_then(|refs| refs.next()) {
                    if !self.visited.insert(node.buid) || self.cmd.omits(&node) {
                        continue;
                    }
                    if !self.cmd.stops_at(&node) {
                        walk.next_round.push((node.clone(), path.clone()));
                    }
                    return Some(Ok((node, path)));
                }

                if let Some((node, path)) = walk.current.pop() {
                    walk.refs = Some(self.cmd.refs_of(self.snap, node, path));
                    continue;
                }

                if walk.rounds_left > 0 && !walk.next_round.is_empty() {
                    walk.rounds_left -= 1;
                    walk.current = std::mem::take(&mut walk.next_round);
                    walk.refs = None;
                    continue;
                }

                self.walk = None;
            }

            let (node, path) = match self.input.next()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };

            if !self.cmd.unique {
                self.visited.clear();
            }
            self.visited.insert(node.buid);
            debug!(src = %node.buid, degrees = self.cmd.degrees, "walking refs");

            self.walk = Some(Walk {
                rounds_left: self.cmd.degrees - 1,
                current: vec![(node.clone(), path.clone())],
                next_round: Vec::new(),
                refs: None,
            });
            if self.cmd.join {
                return Some(Ok((node, path)));
            }
        }
    }
}
