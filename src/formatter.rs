//! Parameter Formatter (C8, spec §4.8).
//!
//! Pure substitution of `${rest_hostname}`, `${rest_port}`, `${rest_schema}`
//! in a configured format string. Each placeholder is replaced in a single
//! pass — if a replacement value itself contains a placeholder-looking
//! substring, it is not re-scanned, since `str::replace` never revisits
//! bytes it has already written.

/// Replaces the three known placeholders in `fmt` and returns the result.
#[must_use]
pub fn format(fmt: &str, hostname: &str, port: &str, schema: &str) -> String {
    fmt.replace("${rest_hostname}", hostname)
        .replace("${rest_port}", port)
        .replace("${rest_schema}", schema)
}
