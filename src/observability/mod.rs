//! Observability: structured logging, metrics and events.

mod event_bus;
mod logging;
mod metrics;
mod request_context;

pub use event_bus::{DEFAULT_EVENT_BUS_CAPACITY, EventBus, FilteredReceiver};
pub use logging::init_logging;
pub use self::metrics::install_prometheus;
pub use request_context::{
    RequestContext, RequestContextGuard, current_request_context, current_request_id,
    enter_request_context, scope_request_context,
};
