use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Failed to build routing pool: {0}")]
    PoolBuild(String),
}
