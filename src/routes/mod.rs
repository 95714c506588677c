mod dispatch;
mod health_check;

pub use dispatch::*;
pub use health_check::*;
