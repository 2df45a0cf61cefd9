pub mod session;
pub mod turn;

pub use session::*;
pub use turn::*;
