pub mod controller;
pub mod manifests;
pub mod resources;

pub use controller::{reconcile_application, reconcile_application_with, ApplicationPass, PassReport};
pub use resources::{ApplicationResourceManager, ApplicationStores};
