use crate::BoxedError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Type erased, serializable error which retains the flattened cause chain
///
/// Consumer state has to be persisted and compared by value, so recorded faults
/// can not hold onto live error objects. This type walks the [`Error::source`]
/// chain once and keeps the individual messages. Nested [`ChainedError`] values
/// encountered along the chain are absorbed so that the resulting list stays flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedError {
    causes: Vec<String>,
}

impl ChainedError {
    /// Creates a new instance from any concrete error type
    pub fn new<E: Error + 'static>(error: E) -> Self {
        (&error as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from a boxed error
    pub fn from_boxed(error: BoxedError) -> Self {
        (error.as_ref() as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance carrying a single, plain message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            causes: vec![message.into()],
        }
    }

    /// Appends the causes of another error, yielding one compound fault
    pub fn chain(mut self, other: Self) -> Self {
        self.causes.extend(other.causes);
        self
    }

    /// Top-most cause of the error, if any
    pub fn head(&self) -> Option<&str> {
        self.causes.first().map(String::as_str)
    }
}

impl Error for ChainedError {}

impl Display for ChainedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.causes.split_first() {
            None => write!(f, "unknown error"),
            Some((head, [])) => write!(f, "{}", head),
            Some((head, rest)) => write!(f, "{} (caused by: {})", head, rest.join("; ")),
        }
    }
}

impl From<&(dyn Error + 'static)> for ChainedError {
    fn from(error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut current: Option<&(dyn Error + 'static)> = Some(error);

        while let Some(error) = current {
            if let Some(chained) = error.downcast_ref::<ChainedError>() {
                causes.extend(chained.causes.iter().cloned());
            } else {
                causes.push(error.to_string());
            }

            current = error.source();
        }

        Self { causes }
    }
}
