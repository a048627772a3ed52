pub mod broker;
pub mod builder;
pub mod definition;
pub mod evaluate;
pub mod functions;
pub mod provider;
pub mod registry;
pub mod resolve;
pub mod template;
pub mod tracker;
pub mod validate;
pub mod var_context;

pub use broker::*;
pub use builder::*;
pub use definition::*;
pub use evaluate::*;
pub use provider::*;
pub use registry::*;
pub use resolve::*;
pub use template::{parse_template, ParseError, Template};
pub use tracker::*;
pub use validate::*;
pub use var_context::*;
