use thiserror::Error;

/// Errors reported by [`LazyTree`](crate::LazyTree) queries.
///
/// None of these are transient: they describe the current contents of the
/// tree, and the call that returned them left the tree unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyTreeError {
    /// A min/max query found no candidate node.
    #[error("tree has no live elements")]
    EmptyTree,

    /// No live node matches the queried value.
    #[error("no live element matches the queried value")]
    NotFound,
}

pub type Result<T, E = LazyTreeError> = std::result::Result<T, E>;
