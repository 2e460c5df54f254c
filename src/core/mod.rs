pub mod error;
pub mod value;

pub use error::{MapperError, Result};
pub use value::Value;
