//! WARDEN Resource Registry
//!
//! Feature code creates observers, event bindings, timers and frame requests
//! that outlive the page state they were made for. Registering them here
//! lets a single [`ResourceRegistry::cleanup`] after each in-page navigation
//! release all of them, so nothing leaks across navigations. Registering
//! through [`ResourceRegistry::scope`] additionally tags a resource with its
//! module, so one failing module can be reset without touching the others.

mod registry;

pub use registry::{
    CleanupFn, CleanupReport, ModuleScope, RegistryCounts, ResourceKind, ResourceRegistry,
    TeardownFailure,
};
