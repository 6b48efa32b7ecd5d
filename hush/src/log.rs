pub use tracing::{Level, debug, error, info, trace, warn};
