pub mod permission;
pub mod route;
pub mod token;
