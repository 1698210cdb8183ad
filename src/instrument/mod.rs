//! Call-graph instrumentation: timing probes and the scanner that
//! installs them.

pub mod probe;
pub mod scanner;

pub use probe::{layer_probe, route_probe};
pub use scanner::{scan, ScanOptions, Scanner};
