//! State container: one reactive state tree, namespaced modules, memoized
//! getters, synchronous commits and asynchronous dispatch.
//!
//! # Invariants
//! - State changes only through mutations applied by [`Store::commit`].
//! - Mutations never see the store, so they cannot commit, dispatch or await.
//! - `commit` and `dispatch` never fail on engine-internal faults; unknown
//!   names and rejected payloads are logged and ignored.
//! - A getter is recomputed only after a state key it read has changed.

pub mod error;
pub mod getters;
pub mod reactive;
pub mod registry;
pub mod store;

pub use error::{ActionError, MutationError};
pub use getters::GetterScope;
pub use reactive::{Change, Dependency, SubscriptionId};
pub use registry::{Module, NAMESPACE_SEPARATOR, OperationKey};
pub use store::{
    ActionContext, ActionResult, Dispatched, ModuleHandle, Store, StoreBuilder, StoreOptions,
};
