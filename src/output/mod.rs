pub mod csv;
pub mod json;
pub mod table;

pub const MISSING: &str = "-";

/// Fixed-precision text for an optional statistic; `None` renders as [`MISSING`].
pub fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_else(|| MISSING.to_string())
}
