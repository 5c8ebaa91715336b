//! Graph-level analyses: ordering, reachability, parallel chains.

pub mod chains;
pub mod topology;
