//! Data model registry: forms, their properties, and property type
//! classification.
//!
//! The traversal engine never scans the model per step. Everything it asks
//! for (`props_by_type`, `ndef_props`, edge endpoints) is indexed once when
//! the model is built.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::tag::TAG_FORM;
use crate::{Error, Result};

/// Type name for properties holding a free `(form, value)` reference.
pub const NDEF_TYPE: &str = "ndef";
/// Type name for properties holding a `(full prop name, value)` reference.
pub const NODEPROP_TYPE: &str = "nodeprop";

/// Endpoint property names on edge forms.
pub const EDGE_N1: &str = "n1";
pub const EDGE_N2: &str = "n2";

// ============================================================================
// Definitions (serde config surface)
// ============================================================================

/// Whether a form is a plain node or a two-endpoint edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormKind {
    #[default]
    Node,
    /// Carries `n1` and `n2` ndef properties naming its endpoints.
    Edge,
}

/// A property declaration inside a [`FormDef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A form declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDef {
    pub name: String,
    #[serde(default)]
    pub kind: FormKind,
    #[serde(default)]
    pub props: Vec<PropDecl>,
}

/// Declarative model definition, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
    #[serde(default)]
    pub forms: Vec<FormDef>,
}

impl ModelDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain form with `(prop name, type name)` properties.
    pub fn form<'s>(mut self, name: &str, props: impl IntoIterator<Item = (&'s str, &'s str)>) -> Self {
        self.forms.push(FormDef {
            name: name.into(),
            kind: FormKind::Node,
            props: decls(props),
        });
        self
    }

    /// Add an edge form. `n1`/`n2` are added automatically.
    pub fn edge<'s>(mut self, name: &str, props: impl IntoIterator<Item = (&'s str, &'s str)>) -> Self {
        self.forms.push(FormDef {
            name: name.into(),
            kind: FormKind::Edge,
            props: decls(props),
        });
        self
    }
}

fn decls<'s>(props: impl IntoIterator<Item = (&'s str, &'s str)>) -> Vec<PropDecl> {
    props
        .into_iter()
        .map(|(name, ty)| PropDecl { name: name.into(), type_name: ty.into() })
        .collect()
}

// ============================================================================
// Resolved model
// ============================================================================

/// How a property's value relates to other nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKind {
    /// Typed with another form: the value is that form's primary value.
    Form,
    /// A free `(form, value)` reference.
    Ndef,
    /// A `(full prop name, value)` reference.
    NodeProp,
    /// Anything else.
    Plain,
}

/// A resolved property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prop {
    pub form: String,
    pub name: String,
    /// `form:name`, the selector used to lift by this property.
    pub full: String,
    pub type_name: String,
    pub kind: PropKind,
}

/// A resolved form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub name: String,
    pub kind: FormKind,
    /// Property names, in declaration order.
    pub props: Vec<String>,
}

impl Form {
    pub fn is_edge(&self) -> bool {
        self.kind == FormKind::Edge
    }
}

/// The model registry.
#[derive(Debug, Clone)]
pub struct Model {
    forms: HashMap<String, Form>,
    props: HashMap<String, Prop>,
    /// type name → full names of properties typed with it
    props_by_type: HashMap<String, Vec<String>>,
    ndef_props: Vec<String>,
}

impl Model {
    /// A model holding only the built-in tag-definition form.
    pub fn new() -> Self {
        // The built-in def is well formed, so this cannot fail.
        Self::from_def(ModelDef::new()).unwrap_or_else(|_| Self::empty())
    }

    fn empty() -> Self {
        Self {
            forms: HashMap::new(),
            props: HashMap::new(),
            props_by_type: HashMap::new(),
            ndef_props: Vec::new(),
        }
    }

    /// Resolve a definition. `syn:tag` is always present.
    pub fn from_def(def: ModelDef) -> Result<Self> {
        let mut forms = vec![builtin_tag_form()];
        forms.extend(def.forms);

        let mut model = Self::empty();

        // Register all form names first so property classification can
        // see forms declared later in the list.
        for fdef in &forms {
            if model.forms.contains_key(&fdef.name) {
                return Err(Error::ModelError(format!("duplicate form: {}", fdef.name)));
            }
            model.forms.insert(fdef.name.clone(), Form {
                name: fdef.name.clone(),
                kind: fdef.kind,
                props: Vec::new(),
            });
        }

        for fdef in forms {
            let mut decls = fdef.props;
            if fdef.kind == FormKind::Edge {
                for end in [EDGE_N1, EDGE_N2] {
                    if !decls.iter().any(|d| d.name == end) {
                        decls.push(PropDecl { name: end.into(), type_name: NDEF_TYPE.into() });
                    }
                }
            }

            for decl in decls {
                let full = format!("{}:{}", fdef.name, decl.name);
                if model.props.contains_key(&full) {
                    return Err(Error::ModelError(format!("duplicate property: {full}")));
                }
                let kind = match decl.type_name.as_str() {
                    NDEF_TYPE => PropKind::Ndef,
                    NODEPROP_TYPE => PropKind::NodeProp,
                    t if model.forms.contains_key(t) => PropKind::Form,
                    _ => PropKind::Plain,
                };

                model.props_by_type.entry(decl.type_name.clone()).or_default().push(full.clone());
                if kind == PropKind::Ndef {
                    model.ndef_props.push(full.clone());
                }
                if let Some(form) = model.forms.get_mut(&fdef.name) {
                    form.props.push(decl.name.clone());
                }
                model.props.insert(full.clone(), Prop {
                    form: fdef.name.clone(),
                    name: decl.name,
                    full,
                    type_name: decl.type_name,
                    kind,
                });
            }
        }

        Ok(model)
    }

    /// Load a model definition from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        let def: ModelDef = serde_json::from_str(text)?;
        Self::from_def(def)
    }

    pub fn form(&self, name: &str) -> Option<&Form> {
        self.forms.get(name)
    }

    pub fn forms(&self) -> impl Iterator<Item = &Form> {
        self.forms.values()
    }

    /// Look up a property by its full `form:name`.
    pub fn prop(&self, full: &str) -> Option<&Prop> {
        self.props.get(full)
    }

    /// Look up a property of a form by its short name.
    pub fn form_prop(&self, form: &str, name: &str) -> Option<&Prop> {
        self.props.get(&format!("{form}:{name}"))
    }

    /// Properties whose declared type is `type_name`.
    pub fn props_by_type<'m>(&'m self, type_name: &str) -> impl Iterator<Item = &'m Prop> + use<'m> {
        self.props_by_type
            .get(type_name)
            .into_iter()
            .flatten()
            .filter_map(|full| self.props.get(full))
    }

    /// All properties typed as free `(form, value)` references.
    pub fn ndef_props(&self) -> impl Iterator<Item = &Prop> {
        self.ndef_props.iter().filter_map(|full| self.props.get(full))
    }

    pub fn is_edge(&self, form: &str) -> bool {
        self.forms.get(form).is_some_and(Form::is_edge)
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_tag_form() -> FormDef {
    FormDef {
        name: TAG_FORM.into(),
        kind: FormKind::Node,
        props: decls([
            ("up", TAG_FORM),
            ("isnow", TAG_FORM),
            ("depth", "int"),
            ("base", "str"),
            ("doc", "str"),
            ("title", "str"),
        ]),
    }
}
