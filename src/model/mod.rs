pub mod index;
pub mod problem;
pub mod query;
pub mod uid;

pub use index::*;
pub use problem::*;
pub use query::*;
pub use uid::{check_name, check_uid, is_valid_uid};
