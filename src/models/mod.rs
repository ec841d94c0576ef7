pub mod blob;
pub mod file;
pub mod stats;
pub mod user;

pub use blob::*;
pub use file::*;
pub use stats::*;
pub use user::*;
