pub mod controller;

pub use controller::{
    deploy_job, reconcile_build_request, reconcile_build_request_with, BuildPassReport,
    BuildRequestPass, BuildStores,
};
