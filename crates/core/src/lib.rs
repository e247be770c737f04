pub mod blood;
pub mod config;
pub mod entity;
pub mod error;
pub mod matching;
pub mod request;

pub use blood::{BloodGroup, MatchMode};
pub use config::Config;
pub use entity::*;
pub use error::*;
pub use matching::*;
pub use request::*;
