//! # Hypergraph Model
//!
//! Plain data types shared by storage, runtime and commands: nodes and
//! their identities, traversal paths, values, tags and the form registry.
//!
//! Design rule: this module is pure data, with no I/O and no query state.

pub mod node;
pub mod path;
pub mod value;
pub mod property_map;
pub mod schema;
pub mod tag;

pub use node::{Buid, Ndef, Node};
pub use path::Path;
pub use value::Value;
pub use property_map::{props, PropertyMap, TagMap};
pub use schema::{Form, FormDef, FormKind, Model, ModelDef, Prop, PropDecl, PropKind};
