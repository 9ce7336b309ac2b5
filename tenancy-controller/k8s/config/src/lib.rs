#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod access;
pub mod cluster;
pub mod controller;
pub mod discovery;
pub mod resources;
pub mod store;

pub use self::{
    access::{AccessBroker, AccessError, AccessRequestBroker, AccessStatus},
    cluster::Cluster,
    controller::ConfigController,
    discovery::{ApiDiscovery, DiscoverResourceName, DiscoveryError, StaticDiscovery},
    resources::{DeletionBlockingResource, GroupedResources, ResourceGrouping, Source},
    store::{ConfigStore, Error, SharedStore, Snapshot},
};
