//! Error types and result definitions for conveyor operations.
//!
//! [`ConveyorError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source, the callsite location and a captured backtrace. Several
//! errors can be aggregated into one, which is how failures of multiple pipeline roles are
//! reported together.
//!
//! Expected control-flow signals of the channel (a `get` timeout or the end of the stream) are
//! not errors and never show up here; see [`crate::channel::Received`].

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use conveyor_config::shared::ValidationError;

/// Convenient result type for conveyor operations.
pub type ConveyorResult<T> = Result<T, ConveyorError>;

/// Payload stored for single [`ConveyorError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for conveyor operations.
#[derive(Debug, Clone)]
pub struct ConveyorError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, typically one per failed role.
    Many {
        errors: Vec<ConveyorError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised by conveyor components.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Misuse of a component. These are programming errors surfaced to the offending caller.
    ChannelClosed,
    AlreadyStarted,
    InvalidConfig,

    // Per-unit failures, captured as data in results.
    WorkItemFailed,
    WorkerPanic,
    TaskFailed,
    TaskPanic,
    Cancelled,

    // Pipeline roles.
    RoleFailed,
    RolePanic,

    // Infrastructure.
    RuntimeInit,
    IoError,

    Unknown,
}

impl ConveyorError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`] if
    /// the aggregate is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error, or of the first aggregated error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.description.as_ref(),
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("no errors aggregated"),
        }
    }

    /// Returns the dynamic detail if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace of a single error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the callsite that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error. Has no effect on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        ConveyorError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for ConveyorError {
    fn eq(&self, other: &ConveyorError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConveyorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for ConveyorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            // Aggregates forward the first contained error as their source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`ConveyorError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for ConveyorError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> ConveyorError {
        ConveyorError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`ConveyorError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for ConveyorError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> ConveyorError {
        ConveyorError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A vector with exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for ConveyorError
where
    E: Into<ConveyorError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> ConveyorError {
        let location = Location::caller();
        let mut errors: Vec<ConveyorError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        ConveyorError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for ConveyorError {
    #[track_caller]
    fn from(err: std::io::Error) -> ConveyorError {
        let detail = err.to_string();
        ConveyorError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<ValidationError> for ConveyorError {
    #[track_caller]
    fn from(err: ValidationError) -> ConveyorError {
        let detail = err.to_string();
        ConveyorError::from_components(
            ErrorKind::InvalidConfig,
            Cow::Borrowed("Invalid configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Renders a panic payload caught by `catch_unwind` into a readable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conveyor_error;

    #[test]
    fn single_error_exposes_kind_and_detail() {
        let err = conveyor_error!(ErrorKind::ChannelClosed, "Channel closed", "put of item 3");
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert_eq!(err.description(), "Channel closed");
        assert_eq!(err.detail(), Some("put of item 3"));
        assert!(err.to_string().starts_with("[ChannelClosed] Channel closed @"));
    }

    #[test]
    fn aggregate_of_one_is_unwrapped() {
        let err: ConveyorError = vec![ConveyorError::from((ErrorKind::RoleFailed, "failed"))].into();
        assert_eq!(err.kinds(), vec![ErrorKind::RoleFailed]);
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn aggregate_flattens_kinds_and_renders_each_error() {
        let err: ConveyorError = vec![
            ConveyorError::from((ErrorKind::RolePanic, "producer panicked")),
            ConveyorError::from((ErrorKind::RoleFailed, "consumer failed")),
        ]
        .into();

        assert_eq!(err.kind(), ErrorKind::RolePanic);
        assert_eq!(err.kinds(), vec![ErrorKind::RolePanic, ErrorKind::RoleFailed]);
        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated"));
        assert!(rendered.contains("1. [RolePanic] producer panicked"));
        assert!(rendered.contains("2. [RoleFailed] consumer failed"));
    }

    #[test]
    fn validation_errors_map_to_invalid_config() {
        let err: ConveyorError = ValidationError::ZeroValue { field: "capacity" }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.detail().unwrap().contains("capacity"));
        assert!(error::Error::source(&err).is_some());
    }

    #[test]
    fn panic_message_handles_both_payload_types() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(static_payload.as_ref()), "boom");
        assert_eq!(panic_message(owned_payload.as_ref()), "bang");
    }
}
