//! Process-wide default orchestrator
//!
//! Nothing is installed implicitly. Callers that want a shared instance install one at
//! startup; tests reset it.

use super::OptimizationOrchestrator;
use std::sync::{Arc, PoisonError, RwLock};

static SHARED: RwLock<Option<Arc<OptimizationOrchestrator>>> = RwLock::new(None);

/// Install `orchestrator` as the shared instance, returning the one it replaces
pub fn install(orchestrator: OptimizationOrchestrator) -> Option<Arc<OptimizationOrchestrator>> {
    SHARED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(Arc::new(orchestrator))
}

/// The shared instance, if one is installed
pub fn current() -> Option<Arc<OptimizationOrchestrator>> {
    SHARED.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Remove the shared instance
pub fn reset() -> Option<Arc<OptimizationOrchestrator>> {
    SHARED.write().unwrap_or_else(PoisonError::into_inner).take()
}
