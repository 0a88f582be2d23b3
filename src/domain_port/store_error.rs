/// Store-agnostic outcome kinds. Adapters classify their driver errors into
/// one of these at the persistence boundary; callers never inspect driver
/// error values.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("transient store failure: {0}")]
    Transient(String),
    /// The operation gave up before committing anything.
    #[error("store operation timed out: {0}")]
    Timeout(String),
}
