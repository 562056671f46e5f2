mod codec;
mod commands;
mod config;
mod core;
mod markup;
mod node_view;
mod ops;
mod plugin;
mod position;
mod schema;
mod serde_value;
mod serialize;
mod session;
mod trigger;

pub use crate::codec::*;
pub use crate::commands::*;
pub use crate::config::*;
pub use crate::core::*;
pub use crate::markup::*;
pub use crate::node_view::*;
pub use crate::ops::*;
pub use crate::plugin::*;
pub use crate::position::*;
pub use crate::schema::*;
pub use crate::serde_value::*;
pub use crate::session::*;
pub use crate::trigger::*;
