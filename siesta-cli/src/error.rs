use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Service error: {0}")]
    Service(#[from] siesta_engine::ServiceError),

    #[error("Request failed: {0}")]
    Request(#[from] siesta_engine::RequestError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}
