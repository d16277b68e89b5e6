mod field;
mod payload;
mod status;

pub use self::field::Field;
pub use self::payload::Payload;
pub use self::status::Status;

/// Error type a processing callback may report; boxed so callers can return whatever
/// error type their handler naturally produces.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a processing callback: `Ok(())` marks the job completed, `Err` marks it failed.
pub type HandlerResult = Result<(), HandlerError>;
