// Domain layer: records, transform results and the ports the engine depends on.

pub mod model;
pub mod ports;
