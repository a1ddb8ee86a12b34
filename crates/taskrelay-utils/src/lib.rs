pub mod error;
pub mod logging;
pub mod redaction;
pub mod types;

pub use error::{
    ConfigError, ErrorCategory, ErrorKind, ProviderError, StoreError, UserFriendlyError,
};
pub use logging::{EventSink, LifecycleEvent, TracingEventSink};
pub use types::{Message, Role};

#[cfg(any(test, feature = "test-utils"))]
pub use logging::RecordingEventSink;
