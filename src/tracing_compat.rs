//! Optional tracing integration.
//!
//! With the `tracing-integration` feature enabled the logging macros used
//! across the crate are the `tracing` crate's own. Without it they expand to
//! nothing, so the instrumented hot path carries no logging cost at all.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __calltrace_log_noop {
    ($($tt:tt)*) => {{}};
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::__calltrace_log_noop as debug;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__calltrace_log_noop as error;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__calltrace_log_noop as info;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__calltrace_log_noop as trace;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__calltrace_log_noop as warn;
