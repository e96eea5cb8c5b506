//! Stream schemas and argument contracts declared by builtins.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tag::TypeTag;

/// What a stream side accepts or produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Typespec {
    /// Compatible with anything.
    Any,
    /// Output side only: the stage passes its input type through unchanged.
    Identity,
    /// A concrete tag, checked against the session's hierarchy.
    Tag(TypeTag),
}

impl fmt::Display for Typespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Typespec::Any => write!(f, "any"),
            Typespec::Identity => write!(f, "identity"),
            Typespec::Tag(t) => write!(f, "{}", t),
        }
    }
}

/// Input side of a builtin's stream contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub spec: Typespec,
    /// The stage also runs with no upstream; absence is not an error.
    pub optional: bool,
    /// Optimized transport formats accepted, in preference order.
    pub opt_formats: Vec<String>,
}

impl InputSchema {
    pub fn any() -> Self {
        Self {
            spec: Typespec::Any,
            optional: false,
            opt_formats: Vec::new(),
        }
    }

    pub fn tag(name: impl Into<TypeTag>) -> Self {
        Self {
            spec: Typespec::Tag(name.into()),
            optional: false,
            opt_formats: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn format(mut self, f: impl Into<String>) -> Self {
        self.opt_formats.push(f.into());
        self
    }
}

/// Computes a stage's output tag at pipeline-build time.
///
/// For builtins whose yield depends on live session state (the classic case
/// is a "current selection" source), the declared spec is a fallback and
/// this closure supplies the real tag. `None` means "fall back to the
/// declared spec".
pub type TypeFn = Arc<dyn Fn() -> Option<TypeTag> + Send + Sync>;

/// Output side of a builtin's stream contract.
#[derive(Clone, Serialize)]
pub struct OutputSchema {
    pub spec: Typespec,
    /// Hint to consumers that merge this stream into a default view.
    pub merge_default: bool,
    /// Optimized transport formats offered, in preference order.
    pub opt_formats: Vec<String>,
    #[serde(skip)]
    pub type_fn: Option<TypeFn>,
}

impl OutputSchema {
    pub fn any() -> Self {
        Self {
            spec: Typespec::Any,
            merge_default: false,
            opt_formats: Vec::new(),
            type_fn: None,
        }
    }

    pub fn identity() -> Self {
        Self {
            spec: Typespec::Identity,
            ..Self::any()
        }
    }

    pub fn tag(name: impl Into<TypeTag>) -> Self {
        Self {
            spec: Typespec::Tag(name.into()),
            ..Self::any()
        }
    }

    pub fn merge_default(mut self) -> Self {
        self.merge_default = true;
        self
    }

    pub fn format(mut self, f: impl Into<String>) -> Self {
        self.opt_formats.push(f.into());
        self
    }

    pub fn type_fn(mut self, f: TypeFn) -> Self {
        self.type_fn = Some(f);
        self
    }

    /// The spec with any dynamic `type_fn` applied.
    pub fn effective_spec(&self) -> Typespec {
        if let Some(f) = &self.type_fn {
            if let Some(tag) = f() {
                return Typespec::Tag(tag);
            }
        }
        self.spec.clone()
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema")
            .field("spec", &self.spec)
            .field("merge_default", &self.merge_default)
            .field("opt_formats", &self.opt_formats)
            .field("type_fn", &self.type_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for OutputSchema {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
            && self.merge_default == other.merge_default
            && self.opt_formats == other.opt_formats
    }
}

/// One named positional slot in a `Fixed` argspec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSlot {
    pub name: String,
    pub optional: bool,
}

impl ArgSlot {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// How many positional arguments a builtin takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSpec {
    /// Arguments are rejected.
    NoArgs,
    /// Anything goes; the builtin sorts it out at run time.
    Unspecified,
    /// Named slots; trailing slots may be optional.
    Fixed(Vec<ArgSlot>),
    /// One repeated slot with a minimum occurrence count.
    Variadic { name: String, min: usize },
}

impl ArgSpec {
    pub fn fixed(slots: impl IntoIterator<Item = ArgSlot>) -> Self {
        ArgSpec::Fixed(slots.into_iter().collect())
    }

    pub fn variadic(name: impl Into<String>, min: usize) -> Self {
        ArgSpec::Variadic {
            name: name.into(),
            min,
        }
    }

    /// Whether `count` positional arguments satisfy this spec.
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            ArgSpec::NoArgs => count == 0,
            ArgSpec::Unspecified => true,
            ArgSpec::Fixed(slots) => {
                let required = slots.iter().filter(|s| !s.optional).count();
                count >= required && count <= slots.len()
            }
            ArgSpec::Variadic { min, .. } => count >= *min,
        }
    }

    /// Short description of the expected count, for error messages.
    pub fn describe(&self) -> String {
        match self {
            ArgSpec::NoArgs => "no arguments".to_string(),
            ArgSpec::Unspecified => "any number of arguments".to_string(),
            ArgSpec::Fixed(slots) => {
                let required = slots.iter().filter(|s| !s.optional).count();
                if required == slots.len() {
                    format!("{} argument(s)", required)
                } else {
                    format!("{} to {} argument(s)", required, slots.len())
                }
            }
            ArgSpec::Variadic { min, .. } => format!("at least {} argument(s)", min),
        }
    }
}

/// Execution domain of a builtin. Stages of one pipeline must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    Local,
    Remote,
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locality::Local => write!(f, "local"),
            Locality::Remote => write!(f, "remote"),
        }
    }
}
