//! Response status classes used to filter access logs and metrics.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use http::StatusCode;

/// A set of response status classes.
///
/// Informational (1xx) responses belong to no class and are never matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResponseStatus(u8);

impl ResponseStatus {
    /// 200-299.
    pub const SUCCESS: Self = Self(1);
    /// 300-399.
    pub const REDIRECT: Self = Self(1 << 1);
    /// 400-499.
    pub const CLIENT_ERROR: Self = Self(1 << 2);
    /// 500-599.
    pub const SERVER_ERROR: Self = Self(1 << 3);

    /// Matches nothing.
    pub const NONE: Self = Self(0);
    /// Every class.
    pub const ALL: Self = Self(0b1111);
    /// Client and server errors.
    pub const ERRORS: Self = Self(Self::CLIENT_ERROR.0 | Self::SERVER_ERROR.0);

    /// Returns the class `code` belongs to, or [`NONE`](Self::NONE).
    pub fn of(code: StatusCode) -> Self {
        match code.as_u16() {
            200..=299 => Self::SUCCESS,
            300..=399 => Self::REDIRECT,
            400..=499 => Self::CLIENT_ERROR,
            500..=599 => Self::SERVER_ERROR,
            _ => Self::NONE,
        }
    }

    /// Reports whether `code` falls in one of the classes of this set.
    pub fn in_range(self, code: StatusCode) -> bool {
        self.0 & Self::of(code).0 != 0
    }

    /// Reports whether every class of `other` is also in this set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Reports whether the set is empty.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ResponseStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ResponseStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ResponseStatus, &str); 4] = [
            (ResponseStatus::SUCCESS, "success"),
            (ResponseStatus::REDIRECT, "redirect"),
            (ResponseStatus::CLIENT_ERROR, "client_error"),
            (ResponseStatus::SERVER_ERROR, "server_error"),
        ];

        if self.is_none() {
            return f.write_str("none");
        }
        let mut first = true;
        for (class, name) in NAMES {
            if self.contains(class) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Forwards to `inner` only for responses whose status is in `codes`.
///
/// Implements both [`AccessLogger`](crate::access_log::AccessLogger) and
/// [`Recorder`](crate::metrics::Recorder) when `inner` does.
#[derive(Debug, Clone)]
pub struct LimitCodes<T> {
    codes: ResponseStatus,
    inner: T,
}

impl<T> LimitCodes<T> {
    /// Limits `inner` to responses in `codes`.
    pub fn new(codes: ResponseStatus, inner: T) -> Self {
        Self { codes, inner }
    }

    /// The status classes that are forwarded.
    pub fn codes(&self) -> ResponseStatus {
        self.codes
    }

    pub(crate) fn allows(&self, code: StatusCode) -> bool {
        self.codes.in_range(code)
    }

    pub(crate) fn inner(&self) -> &T {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(ResponseStatus::of(StatusCode::OK), ResponseStatus::SUCCESS);
        assert_eq!(ResponseStatus::of(StatusCode::FOUND), ResponseStatus::REDIRECT);
        assert_eq!(ResponseStatus::of(StatusCode::NOT_FOUND), ResponseStatus::CLIENT_ERROR);
        assert_eq!(ResponseStatus::of(StatusCode::BAD_GATEWAY), ResponseStatus::SERVER_ERROR);
        assert_eq!(ResponseStatus::of(StatusCode::CONTINUE), ResponseStatus::NONE);
    }

    #[test]
    fn test_in_range() {
        assert!(ResponseStatus::ERRORS.in_range(StatusCode::NOT_FOUND));
        assert!(ResponseStatus::ERRORS.in_range(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!ResponseStatus::ERRORS.in_range(StatusCode::OK));
        assert!(!ResponseStatus::ALL.in_range(StatusCode::SWITCHING_PROTOCOLS));
        assert!(!ResponseStatus::NONE.in_range(StatusCode::OK));
    }

    #[test]
    fn test_combine_and_display() {
        let mut set = ResponseStatus::SUCCESS;
        set |= ResponseStatus::SERVER_ERROR;
        assert!(set.contains(ResponseStatus::SUCCESS));
        assert!(!set.contains(ResponseStatus::ERRORS));
        assert_eq!(set.to_string(), "success|server_error");
        assert_eq!(ResponseStatus::NONE.to_string(), "none");
        assert_eq!(
            ResponseStatus::SUCCESS | ResponseStatus::REDIRECT | ResponseStatus::ERRORS,
            ResponseStatus::ALL
        );
    }
}
