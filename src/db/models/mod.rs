//! Database models split into domain-specific modules.

pub mod common;
pub mod contact;
pub mod gallery;
pub mod media;
pub mod user;

pub use common::*;
pub use contact::*;
pub use gallery::*;
pub use media::*;
pub use user::*;
