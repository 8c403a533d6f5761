//! # Exit Codes
//!
//! Maps the terminal status of an RPC onto a process exit code.
//!
//! Exit codes 1 and 2 are already used for fatal errors and usage errors, which would
//! collide with the gRPC codes `Cancelled` and `Unknown`. Non-OK statuses are therefore
//! offset by [`STATUS_CODE_OFFSET`].
use tonic::Code;

/// Offset added to a non-OK gRPC status code to form the exit code.
pub const STATUS_CODE_OFFSET: i32 = 64;

/// Exit code for a generic fatal error.
pub const EXIT_FATAL: i32 = 1;

/// Exit code for a command-line usage error.
pub const EXIT_USAGE: i32 = 2;

/// Returns the process exit code for a terminal gRPC status code.
pub fn exit_code_for(code: Code) -> i32 {
    match code {
        Code::Ok => 0,
        code => STATUS_CODE_OFFSET + code as i32,
    }
}

/// Picks the singular or plural form of `noun` for `count`.
pub fn pluralize(count: usize, noun: &str) -> String {
    if count == 1 {
        noun.to_string()
    } else {
        format!("{noun}s")
    }
}

/// The verbose summary line printed after an invocation.
pub fn summary(requests: usize, responses: usize) -> String {
    format!(
        "Sent {requests} {} and received {responses} {}",
        pluralize(requests, "request"),
        pluralize(responses, "response")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_maps_to_zero() {
        assert_eq!(exit_code_for(Code::Ok), 0);
    }

    #[test]
    fn non_ok_codes_are_offset() {
        assert_eq!(exit_code_for(Code::NotFound), 69);
        assert_eq!(exit_code_for(Code::Cancelled), 65);
        assert_eq!(exit_code_for(Code::Unauthenticated), 80);
    }

    #[test]
    fn offset_codes_never_collide_with_cli_codes() {
        let codes = [
            Code::Cancelled,
            Code::Unknown,
            Code::InvalidArgument,
            Code::Unavailable,
        ];

        for code in codes {
            let exit = exit_code_for(code);
            assert_ne!(exit, EXIT_FATAL);
            assert_ne!(exit, EXIT_USAGE);
        }
    }

    #[test]
    fn pluralization_uses_exact_count() {
        assert_eq!(pluralize(0, "request"), "requests");
        assert_eq!(pluralize(1, "request"), "request");
        assert_eq!(pluralize(2, "response"), "responses");
    }

    #[test]
    fn summary_line() {
        assert_eq!(summary(1, 3), "Sent 1 request and received 3 responses");
        assert_eq!(summary(0, 1), "Sent 0 requests and received 1 response");
    }
}
