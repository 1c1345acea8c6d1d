//! API request handlers

mod attach;
mod health;
mod user;

pub use attach::*;
pub use health::*;
pub use user::*;
