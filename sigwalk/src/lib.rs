mod bringup;
pub mod builtin;
mod config;
mod context;
mod error;
mod external;
#[cfg(all(windows, feature = "process-internal"))]
pub mod native;
mod objects;
mod pipeline;
mod properties;
mod registry;
mod signature;

pub use bringup::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use external::*;
pub use objects::*;
pub use pipeline::*;
pub use properties::*;
pub use registry::*;
pub use signature::*;

pub use sigwalk_image as image;
pub use sigwalk_scanner as scanner;
