mod handler_fn;
/// Handler module
mod handler_trait;

pub use handler_fn::HandlerFn;
pub use handler_trait::Handler;
