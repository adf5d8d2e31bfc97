pub mod session;
pub mod source;

pub use session::*;
pub use source::*;
