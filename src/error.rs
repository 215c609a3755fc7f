use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    // Status code in HTTP terms, used by the handler layer
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized => 403,
            Error::NotFound(_) => 404,
            Error::StoreUnavailable(_) | Error::Config(_) => 500,
        }
    }

    /// Message safe to hand back to a caller. Store failures are collapsed
    /// into a generic message; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            Error::StoreUnavailable(_) | Error::Config(_) => "Something went wrong!".to_string(),
            other => other.to_string(),
        }
    }
}
