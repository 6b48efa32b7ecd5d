pub(crate) mod context;
pub(crate) mod pipeline;
pub(crate) mod pool;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod trusted_proxy;
