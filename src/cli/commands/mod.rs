//! CLI command implementations

pub mod lifecycle;
pub mod list;
pub mod login;

pub use lifecycle::execute as lifecycle;
pub use list::execute as list;
pub use login::execute as login;
