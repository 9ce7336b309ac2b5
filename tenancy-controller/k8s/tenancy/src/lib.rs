#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod common;
pub mod names;
pub mod project;
pub mod rbac;
pub mod workspace;

pub use self::{
    common::{Context, Error, CONTROLLER_NAME},
    project::ProjectController,
    rbac::RbacSetup,
    workspace::WorkspaceController,
};
