use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Write;

use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::WithErrors;

/// Create an internal error.
///
/// # Example
/// ```rust
/// use federation_satisfiability::internal_error;
/// use federation_satisfiability::error::FederationError;
/// # fn may_be_none() -> Option<()> { None }
///
/// const NAME: &str = "the thing";
/// let result: Result<(), FederationError> = may_be_none()
///     .ok_or_else(|| internal_error!("Expected {NAME} to be Some"));
/// ```
#[macro_export]
macro_rules! internal_error {
    ( $( $arg:tt )+ ) => {
        $crate::error::FederationError::internal(format!( $( $arg )+ ))
    }
}

/// Break out of the current function, returning an internal error.
///
/// # Example
/// ```rust
/// use federation_satisfiability::bail;
/// use federation_satisfiability::error::FederationError;
/// # fn may_be_none() -> Option<()> { None }
///
/// fn example() -> Result<(), FederationError> {
///     bail!("Something went horribly wrong");
///     unreachable!()
/// }
/// #
/// # _ = example();
/// ```
#[macro_export]
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::internal_error!( $( $arg )+ ).into())
    }
}

/// A safe assertion: in debug mode, it panicks on failure, and in production, it returns an
/// internal error.
///
/// Treat this as an assertion. It must only be used for conditions that *should never happen*
/// in normal operation.
///
/// # Example
/// ```rust,no_run
/// use federation_satisfiability::ensure;
/// use federation_satisfiability::error::FederationError;
/// # fn may_be_none() -> Option<()> { None }
///
/// fn example() -> Result<(), FederationError> {
///     ensure!(1 == 0, "Something went horribly wrong");
///     unreachable!()
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ( $expr:expr, $( $arg:tt )+ ) => {
        #[cfg(debug_assertions)]
        {
            if false {
                return Err($crate::error::FederationError::internal("ensure!() must be used in a function that returns a Result").into());
            }
            assert!($expr, $( $arg )+);
        }

        #[cfg(not(debug_assertions))]
        if !$expr {
            $crate::bail!( $( $arg )+ );
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFederationError {
    #[error(
        "An internal error has occurred, please report this bug to Apollo.\n\nDetails: {message}"
    )]
    Internal { message: String },
    #[error("{message}")]
    InvalidGraphQL { message: String },
    #[error("{message}")]
    InvalidFieldSet { message: String },
    #[error("[{subgraph}] {message}")]
    InvalidSubgraph { subgraph: String, message: String },
}

impl SingleFederationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SingleFederationError::Internal { .. } => ErrorCode::Internal,
            SingleFederationError::InvalidGraphQL { .. } => ErrorCode::InvalidGraphQL,
            SingleFederationError::InvalidFieldSet { .. } => ErrorCode::InvalidFieldSet,
            SingleFederationError::InvalidSubgraph { .. } => ErrorCode::InvalidSubgraph,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct MultipleFederationErrors {
    pub errors: Vec<SingleFederationError>,
}

impl MultipleFederationErrors {
    pub fn push(&mut self, error: FederationError) {
        match error {
            FederationError::SingleFederationError(error) => {
                self.errors.push(error);
            }
            FederationError::MultipleFederationErrors(errors) => {
                self.errors.extend(errors.errors);
            }
        }
    }
}

impl Display for MultipleFederationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "The following errors occurred:")?;
        for error in &self.errors {
            write!(f, "\n\n  - ")?;
            for c in error.to_string().chars() {
                if c == '\n' {
                    write!(f, "\n    ")?;
                } else {
                    f.write_char(c)?;
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<SingleFederationError> for MultipleFederationErrors {
    fn from_iter<T: IntoIterator<Item = SingleFederationError>>(iter: T) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FederationError {
    #[error(transparent)]
    SingleFederationError(#[from] SingleFederationError),
    #[error(transparent)]
    MultipleFederationErrors(#[from] MultipleFederationErrors),
}

impl FederationError {
    pub fn internal(message: impl Into<String>) -> Self {
        SingleFederationError::Internal {
            message: message.into(),
        }
        .into()
    }

    /// Returns the errors of this value, whether it holds one or many.
    pub fn errors(&self) -> Vec<&SingleFederationError> {
        match self {
            FederationError::SingleFederationError(error) => vec![error],
            FederationError::MultipleFederationErrors(errors) => errors.errors.iter().collect(),
        }
    }
}

impl From<DiagnosticList> for FederationError {
    fn from(value: DiagnosticList) -> Self {
        SingleFederationError::InvalidGraphQL {
            message: value.to_string(),
        }
        .into()
    }
}

impl<T> From<WithErrors<T>> for FederationError {
    fn from(value: WithErrors<T>) -> Self {
        value.errors.into()
    }
}

/// Error codes surfaced by this crate. The displayed form is the code reported to users.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Internal,
    #[strum(to_string = "INVALID_GRAPHQL")]
    InvalidGraphQL,
    InvalidFieldSet,
    InvalidSubgraph,
    SatisfiabilityError,
}

/// Errors raised by composition. Satisfiability errors carry the full, human readable explanation
/// (witness operation included) in their message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompositionError {
    #[error("{message}")]
    SatisfiabilityError { message: String },
    #[error(transparent)]
    InternalError(#[from] FederationError),
}

impl CompositionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CompositionError::SatisfiabilityError { .. } => ErrorCode::SatisfiabilityError,
            CompositionError::InternalError(error) => error
                .errors()
                .first()
                .map_or(ErrorCode::Internal, |error| error.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn error_codes_are_screaming_snake_case() {
        let codes = ErrorCode::iter().map(|code| code.to_string()).collect::<Vec<_>>();
        assert_eq!(
            codes,
            [
                "INTERNAL",
                "INVALID_GRAPHQL",
                "INVALID_FIELD_SET",
                "INVALID_SUBGRAPH",
                "SATISFIABILITY_ERROR",
            ]
        );
    }

    #[test]
    fn multiple_errors_are_flattened() {
        let mut errors = MultipleFederationErrors { errors: vec![] };
        errors.push(FederationError::internal("first"));
        errors.push(
            MultipleFederationErrors::from_iter([
                SingleFederationError::InvalidFieldSet {
                    message: "second".to_owned(),
                },
                SingleFederationError::InvalidSubgraph {
                    subgraph: "S1".to_owned(),
                    message: "third".to_owned(),
                },
            ])
            .into(),
        );
        assert_eq!(errors.errors.len(), 3);
        insta::assert_snapshot!(errors, @r###"
        The following errors occurred:

          - An internal error has occurred, please report this bug to Apollo.

            Details: first

          - second

          - [S1] third
        "###);
    }

    #[test]
    fn composition_error_code() {
        let error = CompositionError::SatisfiabilityError {
            message: "nope".to_owned(),
        };
        assert_eq!(error.code(), ErrorCode::SatisfiabilityError);
        let error = CompositionError::from(FederationError::internal("boom"));
        assert_eq!(error.code(), ErrorCode::Internal);
    }
}
