//! Type definitions for statepop

mod county;
mod error;

pub use county::*;
pub use error::*;
