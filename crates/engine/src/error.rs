use lifeline_router::RouterError;
use thiserror::Error;

/// Failures while starting the engine. Runtime errors travel as
/// [`lifeline_core::LifelineError`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Routing pool error: {0}")]
    Router(#[from] RouterError),
}
