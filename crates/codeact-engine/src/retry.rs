//! Failure classification for retry accounting.
//!
//! An expected test failure (the model ran a test suite and it failed) is
//! signal, not malfunction: the output goes back to the model but the
//! retry counter stays put. The same holds for a plain exit 1 from
//! `terminal_run`.

/// Command fragments identifying test runners.
const TEST_RUNNERS: &[&str] = &[
    "pytest",
    "unittest",
    "jest",
    "go test",
    "cargo test",
    "npm test",
    "yarn test",
    "pnpm test",
    "bun test",
    "mocha",
    "vitest",
    "dotnet test",
    "mvn test",
    "gradle test",
    "ctest",
];

/// Output fragments that positively identify a failing test run.
const TEST_FAILURE_SIGNATURES: &[&str] = &[
    "AssertionError",
    "FAILED",
    "FAIL:",
    "=== FAILURES ===",
    "Tests failed",
    "test result: FAILED",
    "not ok",
];

pub fn is_test_command(command_line: &str) -> bool {
    let lower = command_line.to_lowercase();
    TEST_RUNNERS.iter().any(|runner| lower.contains(runner))
}

pub fn has_test_failure_signature(output: &str) -> bool {
    TEST_FAILURE_SIGNATURES.iter().any(|sig| output.contains(sig))
}

/// The non-penalizing classification: a test-runner command that either
/// exited non-zero or printed a failure signature.
pub fn is_expected_test_failure(command_line: &str, exit_code: Option<i64>, output: &str) -> bool {
    is_test_command(command_line)
        && (exit_code.is_some_and(|c| c != 0) || has_test_failure_signature(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_test_runners() {
        assert!(is_test_command("pytest -q tests/"));
        assert!(is_test_command("python -m unittest discover"));
        assert!(is_test_command("npx jest --ci"));
        assert!(is_test_command("cargo test --workspace"));
        assert!(is_test_command("npm test"));
        assert!(is_test_command("CTest -N"));
    }

    #[test]
    fn ordinary_commands_are_not_test_runners() {
        assert!(!is_test_command("python main.py"));
        assert!(!is_test_command("ls -la"));
        assert!(!is_test_command("cargo build"));
    }

    #[test]
    fn failing_pytest_is_expected() {
        assert!(is_expected_test_failure(
            "pytest -q",
            Some(1),
            "E AssertionError: expected 2"
        ));
        // Non-zero exit is enough on its own.
        assert!(is_expected_test_failure("pytest -q", Some(127), ""));
        // A signature is enough even with exit 0.
        assert!(is_expected_test_failure(
            "pytest -q",
            Some(0),
            "1 failed; AssertionError"
        ));
    }

    #[test]
    fn passing_test_run_is_not_expected_failure() {
        assert!(!is_expected_test_failure("pytest -q", Some(0), "3 passed"));
    }

    #[test]
    fn non_test_command_never_expected() {
        assert!(!is_expected_test_failure(
            "python main.py",
            Some(1),
            "AssertionError"
        ));
    }
}
