pub mod files;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use files::*;
pub use memory::*;
pub use postgres::*;
pub use traits::*;
