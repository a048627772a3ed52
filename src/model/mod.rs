pub mod catalog;
pub mod common;
pub mod instance;
pub mod operation;
pub mod plan;
pub mod request;
pub mod value;
pub mod variable;

pub use catalog::*;
pub use common::*;
pub use instance::*;
pub use operation::*;
pub use plan::*;
pub use request::*;
pub use value::*;
pub use variable::*;
