#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use tenancy_controller_k8s_api as k8s;
pub use tenancy_controller_k8s_config as config;
pub use tenancy_controller_k8s_tenancy as tenancy;

mod admission;
mod args;
mod identity;

pub use self::{admission::Admission, args::Args};
