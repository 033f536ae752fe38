use std::collections::HashMap;

use crate::bin_type::BinType;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StackError {
    #[error("expected the stack to end with {expected:?}, but it was {got:?}")]
    IncompatibleTypesOnStack {
        expected: Vec<BinType>,
        got: Vec<BinType>,
    },
    #[error("expected at least {expected} values on the stack, got {got}")]
    NotEnoughValues { expected: usize, got: usize },
    #[error("generic type {name} was never bound")]
    UnresolvedGeneric { name: &'static str },
}

/// One entry of a stack shape. `Generic` names are unified per
/// instruction occurrence; `Many` repeats its tag a fixed number of times
/// when the limit is non-negative and greedily otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Concrete(BinType),
    Generic(&'static str),
    Many(Box<TypeTag>, i32),
}

impl TypeTag {
    pub fn many(tag: TypeTag, limit: i32) -> Self {
        TypeTag::Many(Box::new(tag), limit)
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeTag::Concrete(t) => t.fmt(f),
            TypeTag::Generic(name) => write!(f, "<{name}>"),
            TypeTag::Many(tag, limit) if *limit < 0 => write!(f, "{tag}[...]"),
            TypeTag::Many(tag, limit) => write!(f, "{tag}[{limit}]"),
        }
    }
}

/// An ordered stack shape, bottom to top.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackState {
    tags: Vec<TypeTag>,
}

impl StackState {
    pub fn new(tags: Vec<TypeTag>) -> Self {
        Self { tags }
    }

    pub fn tags(&self) -> &[TypeTag] {
        &self.tags
    }

    pub fn then(self, after: StackState) -> StackTransformation {
        StackTransformation {
            before: self,
            after,
        }
    }
}

impl From<Vec<TypeTag>> for StackState {
    fn from(tags: Vec<TypeTag>) -> Self {
        Self::new(tags)
    }
}

impl From<Vec<BinType>> for StackState {
    fn from(types: Vec<BinType>) -> Self {
        Self::new(types.into_iter().map(TypeTag::Concrete).collect())
    }
}

/// The declarative before/after shape of the stack for one instruction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackTransformation {
    pub before: StackState,
    pub after: StackState,
}

impl std::fmt::Display for StackTransformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |tags: &[TypeTag]| {
            tags.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "[{}] -> [{}]",
            join(self.before.tags()),
            join(self.after.tags())
        )
    }
}

/// The live model of the value stack while a function body assembles.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    items: Vec<BinType>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Up to `n` entries from the top, bottom-first.
    pub fn top(&self, n: usize) -> &[BinType] {
        &self.items[self.items.len().saturating_sub(n)..]
    }

    pub fn push(&mut self, ty: BinType) {
        self.items.push(ty);
    }

    fn try_pop_type(&mut self, ty: BinType) -> Option<BinType> {
        if self.items.last() == Some(&ty) {
            self.items.pop()
        } else {
            None
        }
    }

    fn pop_type(&mut self, ty: BinType) -> Result<BinType, StackError> {
        self.try_pop_type(ty).ok_or_else(|| {
            StackError::IncompatibleTypesOnStack {
                expected: vec![ty],
                got: self.top(1).to_vec(),
            }
        })
    }

    /// Verify and apply a transformation, binding generics as they are
    /// met. Fixed repeats are expanded, greedy repeats pop while the top
    /// keeps matching, and generics already bound (by the instruction's
    /// arguments or an earlier occurrence) must match exactly.
    pub fn apply(
        &mut self,
        transformation: &StackTransformation,
        bindings: &mut HashMap<&'static str, BinType>,
    ) -> Result<(), StackError> {
        let before = expand(transformation.before.tags());
        let required = before
            .iter()
            .filter(|tag| !matches!(tag, TypeTag::Many(_, limit) if *limit < 0))
            .count();
        if self.items.len() < required {
            return Err(StackError::NotEnoughValues {
                expected: required,
                got: self.items.len(),
            });
        }

        for tag in before.iter().rev() {
            match tag {
                TypeTag::Concrete(ty) => {
                    self.pop_type(*ty)?;
                }
                TypeTag::Generic(name) => match bindings.get(name) {
                    Some(&ty) => {
                        self.pop_type(ty)?;
                    }
                    None => {
                        // depth was checked above, the pop cannot miss
                        if let Some(ty) = self.items.pop() {
                            bindings.insert(*name, ty);
                        }
                    }
                },
                TypeTag::Many(inner, _) => {
                    let ty = match inner.as_ref() {
                        TypeTag::Concrete(ty) => *ty,
                        TypeTag::Generic(name) => match bindings.get(name) {
                            Some(&ty) => ty,
                            None => match self.items.last().copied() {
                                Some(ty) => {
                                    bindings.insert(*name, ty);
                                    ty
                                }
                                None => continue,
                            },
                        },
                        TypeTag::Many(_, _) => continue,
                    };
                    while self.try_pop_type(ty).is_some() {}
                }
            }
        }

        for tag in expand(transformation.after.tags()) {
            match tag {
                TypeTag::Concrete(ty) => self.items.push(ty),
                TypeTag::Generic(name) => {
                    let ty = bindings
                        .get(name)
                        .copied()
                        .ok_or(StackError::UnresolvedGeneric { name })?;
                    self.items.push(ty);
                }
                TypeTag::Many(_, _) => {}
            }
        }
        Ok(())
    }
}

/// Expand fixed-count `Many` tags into that many copies of their inner
/// tag; greedy ones are kept as-is.
fn expand(tags: &[TypeTag]) -> Vec<TypeTag> {
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        match tag {
            TypeTag::Many(inner, limit) if *limit >= 0 => {
                for _ in 0..*limit {
                    out.push(inner.as_ref().clone());
                }
            }
            other => out.push(other.clone()),
        }
    }
    out
}
