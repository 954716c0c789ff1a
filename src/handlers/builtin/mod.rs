mod log_handler;
mod plan_handler;
mod record_handler;
mod value_handler;

use std::sync::Arc;

use crate::handlers::HandlerRegistry;

/// Register all built-in handlers into the registry.
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(log_handler::LogHandler));
    registry.register(Arc::new(value_handler::SetValuesHandler));
    registry.register(Arc::new(record_handler::CountRecordsHandler));
    registry.register(Arc::new(record_handler::UpdateRecordsHandler));
    registry.register(Arc::new(plan_handler::SetPlanHandler));
}
