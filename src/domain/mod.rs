pub mod enforced;
pub mod limits;
pub mod request;
pub mod schedule;

pub use enforced::*;
pub use limits::*;
pub use request::*;
pub use schedule::*;
