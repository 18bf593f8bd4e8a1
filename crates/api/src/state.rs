//! Application state

use std::sync::Arc;

use senalign_payments::PaymentService;

use crate::analysis::AnalysisEngine;
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    /// External analysis pipeline; None when not configured.
    pub engine: Option<Arc<dyn AnalysisEngine>>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        payments: Arc<PaymentService>,
        engine: Option<Arc<dyn AnalysisEngine>>,
        config: Config,
    ) -> Self {
        Self {
            payments,
            engine,
            config,
        }
    }
}
