//! Small, dependency-light helpers shared by every crate in the workspace:
//! a convention for mapping internal errors to external ones while logging
//! and reporting them, plus PII redaction for anything that might end up in
//! a log line (CRM URLs, bearer tokens, record payloads).

mod handling;
mod redact;
mod reporting;

pub use handling::{convert_log_report_error, ErrorHandling, ErrorReporting, GetErrorHandling};
pub use redact::{redact_bearer_token, redact_url};
pub use reporting::{
    report_breadcrumb, report_error_to_app, set_application_error_reporter,
    unset_application_error_reporter, ApplicationErrorReporter, TestErrorReporter,
};

/// Log at `$level`, and if `$class` is given, also forward to the
/// registered [`ApplicationErrorReporter`].
#[macro_export]
macro_rules! report_error {
    ($class:expr, $($args:tt)*) => {{
        let message = format!($($args)*);
        log::warn!("{}", message);
        $crate::report_error_to_app($class.to_string(), message);
    }};
}

/// Wraps `$result` (a `Result<T, IE>`), converting its error via
/// `GetErrorHandling` and performing the prescribed logging/reporting.
#[macro_export]
macro_rules! handle_error {
    ($result:expr) => {
        $result.map_err($crate::convert_log_report_error)
    };
}
