use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(u64),

    #[error("Item not found: {0}")]
    ItemNotFound(u64),

    #[error("Event not found: {0}")]
    EventNotFound(u64),

    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: u64,
        from: String,
        to: String,
    },

    #[error("Invalid key format: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
