use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),
}
