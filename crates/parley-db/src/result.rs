//! Result and value types shared by the gateway and the stores.

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Uint(u64),
    Str(String),
    Bool(bool),
    Double(f64),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::Uint(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Str(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Str(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

/// Shape of a successful statement execution.
///
/// Column values are always surfaced as strings; the stores parse them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteResult {
    /// The statement produced no result set (INSERT/UPDATE/DELETE).
    Empty,
    /// Exactly one row.
    Row(Vec<String>),
    /// Two or more rows.
    Rows(Vec<Vec<String>>),
}

impl ExecuteResult {
    /// All rows regardless of shape; `Empty` yields none.
    pub fn into_rows(self) -> Vec<Vec<String>> {
        match self {
            ExecuteResult::Empty => Vec::new(),
            ExecuteResult::Row(row) => vec![row],
            ExecuteResult::Rows(rows) => rows,
        }
    }
}

/// Sub-codes carried on `NotFound` to distinguish business outcomes
/// from plain row absence. These never reach the wire.
pub mod subcode {
    pub const EMAIL_TAKEN: &str = "email-taken";
    pub const NAME_EXHAUSTED: &str = "name-exhausted";
    pub const WRONG_PASSWORD: &str = "wrong-password";
}

/// Outcome of a data-access operation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult<T> {
    Success(T),
    /// Row absence, or a business refusal tagged with a sub-code.
    NotFound(Option<String>),
    ConnectionError(String),
    InternalError(String),
}

impl<T> QueryResult<T> {
    pub fn not_found() -> Self {
        QueryResult::NotFound(None)
    }

    pub fn not_found_with(sub: &str) -> Self {
        QueryResult::NotFound(Some(sub.to_string()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryResult::Success(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryResult::NotFound(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            QueryResult::ConnectionError(_) | QueryResult::InternalError(_)
        )
    }

    /// The sub-code on a `NotFound`, if any.
    pub fn sub_code(&self) -> Option<&str> {
        match self {
            QueryResult::NotFound(Some(sub)) => Some(sub),
            _ => None,
        }
    }

    /// Map the success value, carrying every other variant through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryResult<U> {
        match self {
            QueryResult::Success(value) => QueryResult::Success(f(value)),
            QueryResult::NotFound(sub) => QueryResult::NotFound(sub),
            QueryResult::ConnectionError(msg) => QueryResult::ConnectionError(msg),
            QueryResult::InternalError(msg) => QueryResult::InternalError(msg),
        }
    }

    /// Re-type the non-success variants of an errored result.
    pub fn cast_err<U>(self) -> QueryResult<U> {
        match self {
            QueryResult::Success(_) => {
                QueryResult::InternalError("cast_err on a success result".to_string())
            }
            QueryResult::NotFound(sub) => QueryResult::NotFound(sub),
            QueryResult::ConnectionError(msg) => QueryResult::ConnectionError(msg),
            QueryResult::InternalError(msg) => QueryResult::InternalError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_carries_non_success_through() {
        let nf: QueryResult<i32> = QueryResult::not_found_with(subcode::WRONG_PASSWORD);
        let mapped = nf.map(|v| v * 2);
        assert_eq!(mapped.sub_code(), Some(subcode::WRONG_PASSWORD));

        let ok = QueryResult::Success(21).map(|v| v * 2);
        assert_eq!(ok, QueryResult::Success(42));
    }

    #[test]
    fn into_rows_normalises_shapes() {
        assert!(ExecuteResult::Empty.into_rows().is_empty());
        assert_eq!(
            ExecuteResult::Row(vec!["1".into()]).into_rows(),
            vec![vec!["1".to_string()]]
        );
        assert_eq!(
            ExecuteResult::Rows(vec![vec!["1".into()], vec!["2".into()]]).into_rows().len(),
            2
        );
    }
}
