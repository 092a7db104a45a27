//! Spaces: the dimension signature of sets and relations.
//!
//! A space carries a parameter count and two tuples (input and output).
//! Sets are represented as relations with a zero-dimensional anonymous
//! input tuple. Tuples are identified by an optional name plus an optional
//! tag; tags are how wrapped `(instance -> reference)` spaces are encoded,
//! with the reference part being a zero-dimensional named tuple.

use serde::{Deserialize, Serialize};

/// One side of a relation: a dimension count with an identifying name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub dim: usize,
}

impl Tuple {
    pub fn anonymous(dim: usize) -> Self {
        Tuple {
            name: None,
            tag: None,
            dim,
        }
    }

    pub fn named(name: &str, dim: usize) -> Self {
        Tuple {
            name: Some(name.to_string()),
            tag: None,
            dim,
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    /// Same underlying statement tuple, ignoring any tag.
    pub fn same_instance(&self, other: &Tuple) -> bool {
        self.name == other.name && self.dim == other.dim
    }
}

/// The signature of a basic map: parameters, input tuple, output tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Space {
    pub nparam: usize,
    pub input: Tuple,
    pub output: Tuple,
}

impl Space {
    /// Space of a relation between two named tuples.
    pub fn map(nparam: usize, input: Tuple, output: Tuple) -> Self {
        Space {
            nparam,
            input,
            output,
        }
    }

    /// Space of a set, modeled as a relation with an empty input tuple.
    pub fn set(nparam: usize, tuple: Tuple) -> Self {
        Space {
            nparam,
            input: Tuple::anonymous(0),
            output: tuple,
        }
    }

    pub fn is_set(&self) -> bool {
        self.input.dim == 0 && self.input.name.is_none()
    }

    pub fn n_in(&self) -> usize {
        self.input.dim
    }

    pub fn n_out(&self) -> usize {
        self.output.dim
    }

    /// Number of columns excluding the constant and any divs.
    pub fn dim(&self) -> usize {
        self.nparam + self.input.dim + self.output.dim
    }

    /// Strip tags from both tuples.
    pub fn untagged(&self) -> Space {
        let mut s = self.clone();
        s.input.tag = None;
        s.output.tag = None;
        s
    }

    /// Space of the domain of this relation, as a set space.
    pub fn domain(&self) -> Space {
        Space::set(self.nparam, self.input.clone())
    }

    /// Space of the range of this relation, as a set space.
    pub fn range(&self) -> Space {
        Space::set(self.nparam, self.output.clone())
    }

    /// Relation space with input and output exchanged.
    pub fn reverse(&self) -> Space {
        Space {
            nparam: self.nparam,
            input: self.output.clone(),
            output: self.input.clone(),
        }
    }
}
