//! rusqlite helpers shared by the sync state store: chunked `IN (...)`
//! queries that respect `SQLITE_LIMIT_VARIABLE_NUMBER`, cached statement
//! prep via [`ConnExt`], and a `ConnectionInitializer`-based schema
//! migration runner.

mod conn_ext;
mod each_chunk;
mod open_database;
mod query_plan;

pub use conn_ext::*;
pub use each_chunk::*;
pub use open_database::*;
pub use query_plan::{maybe_log_plan, QueryPlan, QueryPlanStep};

/// In PRAGMA foo='bar', `'bar'` must be a constant string (it cannot be a
/// bound parameter), so we need to escape manually. According to
/// https://www.sqlite.org/faq.html, the only character that must be escaped is
/// the single quote, which is escaped by placing two single quotes in a row.
pub fn escape_string_for_pragma(s: &str) -> String {
    s.replace("'", "''")
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn test_escape_string_for_pragma() {
        assert_eq!(escape_string_for_pragma("foobar"), "foobar");
        assert_eq!(escape_string_for_pragma("'foo'bar'"), "''foo''bar''");
        assert_eq!(escape_string_for_pragma("''"), "''''");
    }
}
