//! Crate-wide error type.
//!
//! Every fallible path funnels into `AppError`, which carries the process
//! exit code alongside the message. Exit codes:
//!
//! - `2` — configuration or input error (bad catalog, bad scoring config)
//! - `3` — no usable data remained after filtering/normalization
//! - `4` — an external collaborator failed (network, filesystem, database)

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Configuration or input error (exit code 2).
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    /// No usable data (exit code 3).
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    /// External collaborator failure: network, filesystem, database (exit code 4).
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::external(format!("Database error: {err}"))
    }
}
