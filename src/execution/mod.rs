//! Pipeline execution.
//!
//! Every stage is a boxed `Iterator` over `Result<(Node, Path)>`. A stage
//! holds its upstream and pulls from it only when its own `next()` is
//! called, so a pipeline does exactly the work its consumer asks for.
//! Errors travel down the stream as `Err` items; the top-level loop stops
//! at the first one.

use crate::command::{self, Command};
use crate::model::*;
use crate::runtime::{Message, Runtime};
use crate::Result;

/// A lazy stream of nodes and the paths that reached them.
pub type NodeStream<'q> = Box<dyn Iterator<Item = Result<(Node, Path)>> + 'q>;

// ============================================================================
// Pipeline
// ============================================================================

/// An ordered chain of commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// Parse a command chain such as `noderefs -d 2 | uniq | limit 10`.
    ///
    /// Every command is validated here; nothing is executed.
    pub fn parse(text: &str) -> Result<Self> {
        let mut commands = Vec::new();
        for argv in command::args::split_pipeline(text)? {
            let Some((name, rest)) = argv.split_first() else {
                continue;
            };
            commands.push(Command::parse(name, rest)?);
        }
        Ok(Self { commands })
    }

    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromIterator<Command> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Query execution result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub nodes: Vec<(Node, Path)>,
    pub messages: Vec<Message>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn buids(&self) -> Vec<Buid> {
        self.nodes.iter().map(|(n, _)| n.buid).collect()
    }

    /// Printed (non-warning) messages, in order.
    pub fn prints(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Print(s) => Some(s.as_str()),
                Message::Warn(_) => None,
            })
            .collect()
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub nodes_yielded: u64,
    pub execution_time_ms: u64,
}

// ============================================================================
// Execution
// ============================================================================

/// Chain the runtime's inputs through every command of `pipeline`.
pub fn execute<'q>(runt: &'q Runtime<'q>, pipeline: &'q Pipeline) -> NodeStream<'q> {
    let mut stream = runt.inputs();
    for cmd in pipeline.commands() {
        stream = cmd.run(runt, stream);
    }
    Box::new(Ticked { runt, inner: stream, done: false })
}

/// The top-level loop: checks for cancellation after every pulled node.
struct Ticked<'q> {
    runt: &'q Runtime<'q>,
    inner: NodeStream<'q>,
    done: bool,
}

impl Iterator for Ticked<'_> {
    type Item = Result<(Node, Path)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.inner.next()? {
            Ok(item) => item,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if let Err(e) = self.runt.tick() {
            self.done = true;
            return Some(Err(e));
        }
        Some(Ok(item))
    }
}

// ============================================================================
// Stage combinators
// ============================================================================

/// Run `setup` when the stage is first pulled, then forward `inner`.
///
/// A failing setup is yielded as the stage's only item.
pub fn on_first_pull<'q, F>(setup: F, inner: NodeStream<'q>) -> NodeStream<'q>
where
    F: FnOnce() -> Result<()> + 'q,
{
    Box::new(OnFirstPull { setup: Some(setup), inner, failed: false })
}

struct OnFirstPull<'q, F> {
    setup: Option<F>,
    inner: NodeStream<'q>,
    failed: bool,
}

impl<F> Iterator for OnFirstPull<'_, F>
where
    F: FnOnce() -> Result<()>,
{
    type Item = Result<(Node, Path)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(setup) = self.setup.take() {
            if let Err(e) = setup() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        if self.failed {
            return None;
        }
        self.inner.next()
    }
}

/// Forward `inner`, then run `finish` once it is exhausted.
///
/// `finish` does not run if the consumer stops early or an error ends the
/// stream first.
pub fn on_exhausted<'q, F>(inner: NodeStream<'q>, finish: F) -> NodeStream<'q>
where
    F: FnOnce() + 'q,
{
    let tail = std::iter::once(finish).flat_map(|finish| {
        finish();
        std::iter::empty::<Result<(Node, Path)>>()
    });
    Box::new(inner.chain(tail))
}

/// Consume `inner` completely, handing each node to `each`, and forward
/// nothing but errors. Cancellation is checked per drained node.
pub fn drain<'q, F>(runt: &'q Runtime<'q>, inner: NodeStream<'q>, each: F) -> NodeStream<'q>
where
    F: FnMut(Node, Path) -> Result<()> + 'q,
{
    Box::new(Drain { runt, inner, each, done: false })
}

struct Drain<'q, F> {
    runt: &'q Runtime<'q>,
    inner: NodeStream<'q>,
    each: F,
    done: bool,
}

impl<F> Iterator for Drain<'_, F>
where
    F: FnMut(Node, Path) -> Result<()>,
{
    type Item = Result<(Node, Path)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let step = match self.inner.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok((node, path))) => {
                    self.runt.tick().and_then(|()| (self.each)(node, path))
                }
                Some(Err(e)) => Err(e),
            };
            if let Err(e) = step {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
