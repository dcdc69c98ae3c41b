//! Service-level result type.

/// Error taxonomy mirrored by the numeric `code` field in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 200,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    Conflict = 409,
    InternalError = 500,
}

impl ErrorCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Outcome of a service call: a code, a human message, and data on
/// success.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResult<T> {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ServiceResult<T> {
    pub fn ok(data: T, message: &str) -> Self {
        Self {
            code: ErrorCode::Success,
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn fail(code: ErrorCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

impl ServiceResult<()> {
    pub fn ok_empty(message: &str) -> Self {
        Self {
            code: ErrorCode::Success,
            message: message.to_string(),
            data: Some(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_carry_their_numeric_value() {
        assert_eq!(ErrorCode::Success.as_i64(), 200);
        assert_eq!(ErrorCode::BadRequest.as_i64(), 400);
        assert_eq!(ErrorCode::Unauthorized.as_i64(), 401);
        assert_eq!(ErrorCode::Forbidden.as_i64(), 403);
        assert_eq!(ErrorCode::NotFound.as_i64(), 404);
        assert_eq!(ErrorCode::Conflict.as_i64(), 409);
        assert_eq!(ErrorCode::InternalError.as_i64(), 500);
    }

    #[test]
    fn ok_and_fail_shape() {
        let ok = ServiceResult::ok(7, "done");
        assert!(ok.is_ok());
        assert_eq!(ok.data, Some(7));

        let fail: ServiceResult<i32> = ServiceResult::fail(ErrorCode::NotFound, "missing");
        assert!(!fail.is_ok());
        assert_eq!(fail.data, None);
    }
}
