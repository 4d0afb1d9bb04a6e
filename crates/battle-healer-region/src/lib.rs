//! Static region tree and health-aware failover lookup.

pub mod registry;

pub use registry::{RegionNode, RegionRegistry, ResolveOpts};
