pub mod detector;
pub mod queue;
pub mod resolver;
pub mod types;


pub use detector::*;
pub use queue::*;
pub use resolver::*;
pub use types::*;
