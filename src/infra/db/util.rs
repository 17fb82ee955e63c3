use crate::application::repos::RepoError;

/// SQLSTATE for `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";
/// SQLSTATE class for connection exceptions.
const CONNECTION_EXCEPTION_CLASS: &str = "08";
/// Server shutting down or not yet accepting connections.
const UNAVAILABLE_CODES: &[&str] = &["57P01", "57P02", "57P03", "53300"];

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => RepoError::unavailable(err),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
            if code == QUERY_CANCELED {
                RepoError::Timeout
            } else if code.starts_with(CONNECTION_EXCEPTION_CLASS)
                || UNAVAILABLE_CODES.contains(&code.as_str())
            {
                RepoError::unavailable(db.message())
            } else {
                RepoError::from_persistence(db.message())
            }
        }
        other => RepoError::from_persistence(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            RepoError::Unavailable(_)
        ));
        assert!(map_sqlx_error(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn io_failures_are_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        assert!(map_sqlx_error(err).is_transient());
    }

    #[test]
    fn decoding_problems_are_permanent() {
        let err = sqlx::Error::ColumnNotFound("units".to_string());
        let mapped = map_sqlx_error(err);
        assert!(matches!(mapped, RepoError::Persistence(_)));
        assert!(!mapped.is_transient());
    }
}
