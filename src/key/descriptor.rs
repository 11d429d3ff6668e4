//! Callable Descriptor Module
//!
//! Describes the signature of a cached callable. Built once by whoever knows
//! the callable; the key deriver never inspects callables itself.

use crate::codec::Value;

// == Parameter Kind ==
/// How a parameter can be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Bindable by position or by name
    Positional,
    /// Collects the positional tail
    Variadic,
    /// Bindable by name only
    KeywordOnly,
}

// == Parameter ==
/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// Bound value when the call omits it; `None` binds null
    pub default: Option<Value>,
    pub kind: ParameterKind,
}

impl Parameter {
    /// A positional parameter with no default.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            kind: ParameterKind::Positional,
        }
    }

    /// A positional parameter with a default value.
    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
            kind: ParameterKind::Positional,
        }
    }

    /// The variadic positional tail.
    pub fn variadic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            kind: ParameterKind::Variadic,
        }
    }

    pub fn keyword_only(name: impl Into<String>, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            default,
            kind: ParameterKind::KeywordOnly,
        }
    }

    /// Value bound before any argument is applied.
    pub(crate) fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

// == Invocation Shape ==
/// How a cached callable produces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationShape {
    /// Returns immediately
    #[default]
    Direct,
    /// Must be awaited
    Suspending,
    /// Yields a sequence of items lazily
    LazySequence,
}

// == Callable Descriptor ==
/// Signature and classification of a cached callable.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableDescriptor {
    qualified_name: String,
    parameters: Vec<Parameter>,
    var_keyword: bool,
    is_method: bool,
    shape: InvocationShape,
}

impl CallableDescriptor {
    /// Creates a descriptor with no parameters.
    ///
    /// # Arguments
    /// * `qualified_name` - Fully-qualified identifier, used to derive the default namespace
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            parameters: Vec::new(),
            var_keyword: false,
            is_method: false,
            shape: InvocationShape::Direct,
        }
    }

    /// Appends a parameter in declaration order.
    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Accepts keyword arguments that match no declared parameter.
    pub fn var_keyword(mut self) -> Self {
        self.var_keyword = true;
        self
    }

    /// Marks the callable as a method: the first positional argument is the
    /// receiver and never contributes to the key.
    pub fn method(mut self) -> Self {
        self.is_method = true;
        self
    }

    pub fn shape(mut self, shape: InvocationShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn accepts_var_keyword(&self) -> bool {
        self.var_keyword
    }

    pub fn is_method(&self) -> bool {
        self.is_method
    }

    pub fn invocation_shape(&self) -> InvocationShape {
        self.shape
    }

    /// Position and name of the variadic parameter, if declared.
    pub fn variadic(&self) -> Option<(usize, &str)> {
        self.parameters
            .iter()
            .enumerate()
            .find(|(_, p)| p.kind == ParameterKind::Variadic)
            .map(|(i, p)| (i, p.name.as_str()))
    }

    pub(crate) fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}
