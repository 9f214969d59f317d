pub mod db;
mod entries;
pub mod models;
mod tables;
mod users;

pub use db::{Database, DatabaseError};
pub use entries::ReservedReferences;
pub use tables::*;
