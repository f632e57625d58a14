/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::fmt::{Debug, Display};

/// Convenience alias for a `Result<T, DistError>`.
pub type DistResult<T> = Result<T, DistError>;

/// Common error type shared through the exchange layer.
///
/// Only runtime conditions travel through this type: a failed collective, a
/// poisoned shared structure, an error raised by a third-party [`Transport`]
/// implementation. Contract violations (mismatched buffer extents, ill-formed
/// CSR offsets) are caller bugs and assert instead of returning `Err`.
///
/// The `kind()` tag disambiguates the origin of an error without forcing a
/// concrete type on transport implementations; the downcasting API retrieves
/// the source error when the concrete type is known.
///
/// [`Transport`]: crate::comm::Transport
#[derive(Debug)]
pub struct DistError {
    kind: DistErrorKind,
    error: anyhow::Error,
}

impl DistError {
    /// Construct a new `DistError` encapsulating `err`.
    ///
    /// Errors constructed this way can be retrieved using downcasting.
    #[track_caller]
    #[inline(never)]
    pub fn new<E>(kind: DistErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            error: anyhow::Error::new(Located::new(err)),
        }
    }

    /// Construct a new `DistError` from a display-able message.
    ///
    /// Errors constructed this way are not necessarily recoverable through
    /// the downcasting API.
    #[track_caller]
    #[inline(never)]
    pub fn message<D>(kind: DistErrorKind, display: D) -> Self
    where
        D: Display + Debug + Send + Sync + 'static,
    {
        Self {
            kind,
            error: anyhow::Error::msg(Located::new(display)),
        }
    }

    /// Construct a new `DistError` tagged [`DistErrorKind::Opaque`].
    #[track_caller]
    #[inline(never)]
    pub fn opaque<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(DistErrorKind::Opaque, err)
    }

    /// Attach context to `self` and return the extended error.
    #[track_caller]
    #[inline(never)]
    pub fn context<C>(self, context: C) -> Self
    where
        C: Display + Debug + Send + Sync + 'static,
    {
        Self {
            kind: self.kind,
            error: self.error.context(Located::new(context)),
        }
    }

    /// Return the kind of the originally constructed error.
    pub fn kind(&self) -> DistErrorKind {
        self.kind
    }

    /// Attempt to downcast the error object by reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        match self.error.downcast_ref::<E>() {
            Some(err) => Some(err),
            None => self.error.downcast_ref::<Located<E>>().map(|e| &e.err),
        }
    }
}

impl Display for DistError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The debug format of `anyhow::Error` prints the full source chain.
        write!(formatter, "DistError: {:?}\n\n{:?}", self.kind, self.error)
    }
}

impl std::error::Error for DistError {
    // `source` is deliberately not implemented: the whole chain is already
    // part of the `Display` output.
}

///////////////////
// DistErrorKind //
///////////////////

/// Tag recording where in the exchange layer an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistErrorKind {
    /// The transport failed to complete a collective call.
    Transport,

    /// A communication plan could not be completed.
    Plan,

    /// A shared structure was poisoned by a failed peer thread.
    LockPoison,

    /// An error without a dedicated tag, typically raised by a third-party
    /// transport implementation.
    Opaque,
}

/// An internal wrapper recording the file and line where an error was
/// constructed or where context was attached.
#[derive(Debug)]
struct Located<T>
where
    T: Debug,
{
    err: T,
    location: &'static std::panic::Location<'static>,
}

impl<T> Located<T>
where
    T: Debug,
{
    #[track_caller]
    fn new(err: T) -> Self {
        Self {
            err,
            location: std::panic::Location::caller(),
        }
    }
}

impl<T> Display for Located<T>
where
    T: Display + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -- ({}:{})",
            self.err,
            self.location.file(),
            self.location.line()
        )
    }
}

impl<T> std::error::Error for Located<T>
where
    T: std::error::Error + Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err.source()
    }
}

//////////////////
// ErrorContext //
//////////////////

/// Add context to a returned error that will be included in the source chain.
pub trait ErrorContext<T> {
    /// Attach the provided context to the error part of the result.
    fn context<C>(self, context: C) -> Result<T, DistError>
    where
        C: Display + Debug + Send + Sync + 'static;

    /// Attach context computed only if `self` is an `Err`.
    fn with_context<F, C>(self, f: F) -> Result<T, DistError>
    where
        C: Display + Debug + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    DistError: From<E>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T, DistError>
    where
        C: Display + Debug + Send + Sync + 'static,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(DistError::from(error).context(context)),
        }
    }

    #[track_caller]
    fn with_context<F, C>(self, f: F) -> Result<T, DistError>
    where
        C: Display + Debug + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(DistError::from(error).context(f())),
        }
    }
}
