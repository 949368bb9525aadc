//! Batched relation loading.
//!
//! Describe a relation with a [`LoaderSpec`], ask a [`BatchLoader`] registry
//! for its loader, and call [`load`](RelationLoader::load) once per parent
//! row; keys from the same scheduling tick resolve through one query.

mod registry;
mod spec;
mod strategy;

pub use registry::{BatchLoader, RelationLoader};
pub use spec::{JoinSpec, LoaderIdentity, LoaderSpec, RelationKind};
pub use strategy::Related;
