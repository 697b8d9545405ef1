//! Handler descriptors, the handler registry, and instance builders.

mod builder;
mod handler;
mod registry;

pub use builder::{Builder, FactoryBuilder, HandlerFactory};
pub use handler::{Handler, HandlerType, MessageHandler};
pub use registry::{HandlerRegistry, MessageHandlerRegistry};
