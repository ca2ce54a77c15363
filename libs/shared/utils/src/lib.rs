pub mod jwt;
pub mod test_utils;

pub use jwt::*;
