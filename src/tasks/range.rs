//! Sweep range expressions
//!
//! ```text
//! 0..5          0 1 2 3 4
//! 0..=1:0.25    0.00 0.25 0.50 0.75 1.00
//! 10..0:-5      10 5
//! [a, b, c]     a b c
//! 1.5, 2, 3     1.5 2 3
//! ```

use crate::error::TaskError;

/// Upper bound on the number of values one expression may produce
const MAX_VALUES: usize = 100_000;

/// Expand a range expression into its values
pub fn expand(expr: &str) -> Result<Vec<String>, TaskError> {
    let text = expr.trim();
    if text.is_empty() {
        return Err(invalid(expr, "empty expression"));
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return list(expr, inner);
    }
    if text.contains("..") {
        return numeric(expr, text);
    }
    list(expr, text)
}

fn list(expr: &str, inner: &str) -> Result<Vec<String>, TaskError> {
    let values: Vec<String> = inner
        .split(',')
        .map(|item| unquote(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect();
    if values.is_empty() {
        return Err(invalid(expr, "empty list"));
    }
    Ok(values)
}

fn unquote(item: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = item.strip_prefix(quote).and_then(|i| i.strip_suffix(quote)) {
            return inner;
        }
    }
    item
}

/// A number together with the decimal places it was written with
#[derive(Debug, Clone, Copy)]
struct Bound {
    value: f64,
    decimals: usize,
}

impl Bound {
    fn parse(expr: &str, text: &str) -> Result<Self, TaskError> {
        let text = text.trim();
        let value: f64 = text
            .parse()
            .map_err(|_| invalid(expr, &format!("{:?} is not a number", text)))?;
        if !value.is_finite() {
            return Err(invalid(expr, &format!("{:?} is not finite", text)));
        }
        let decimals = text
            .split_once('.')
            .map(|(_, frac)| frac.chars().take_while(char::is_ascii_digit).count())
            .unwrap_or(0);
        Ok(Self { value, decimals })
    }
}

fn numeric(expr: &str, text: &str) -> Result<Vec<String>, TaskError> {
    let (span, step) = match text.rsplit_once(':') {
        Some((span, step)) => (span, Some(Bound::parse(expr, step)?)),
        None => (text, None),
    };
    let (start, end, inclusive) = match span.split_once("..=") {
        Some((start, end)) => (start, end, true),
        None => match span.split_once("..") {
            Some((start, end)) => (start, end, false),
            None => return Err(invalid(expr, "expected start..end")),
        },
    };
    let start = Bound::parse(expr, start)?;
    let end = Bound::parse(expr, end)?;
    let step = step.unwrap_or(Bound {
        value: 1.0,
        decimals: 0,
    });

    if step.value == 0.0 {
        return Err(invalid(expr, "step must not be zero"));
    }
    if (end.value - start.value) * step.value < 0.0 {
        return Err(invalid(expr, "step points away from the end of the range"));
    }

    let decimals = start.decimals.max(end.decimals).max(step.decimals);
    let epsilon = step.value.abs() * 1e-9;
    let within = |v: f64| {
        if step.value > 0.0 {
            if inclusive {
                v <= end.value + epsilon
            } else {
                v < end.value - epsilon
            }
        } else if inclusive {
            v >= end.value - epsilon
        } else {
            v > end.value + epsilon
        }
    };

    let mut values = Vec::new();
    loop {
        let v = start.value + values.len() as f64 * step.value;
        if !within(v) {
            break;
        }
        if values.len() == MAX_VALUES {
            return Err(invalid(expr, &format!("more than {} values", MAX_VALUES)));
        }
        values.push(format_number(v, decimals));
    }
    Ok(values)
}

fn format_number(value: f64, decimals: usize) -> String {
    if decimals == 0 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.*}", decimals, value)
    }
}

fn invalid(expr: &str, reason: &str) -> TaskError {
    TaskError::Range {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(expr: &str) -> Vec<String> {
        expand(expr).unwrap()
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(values("0..5"), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(values("1..=3"), vec!["1", "2", "3"]);
        assert_eq!(values("10..0:-5"), vec!["10", "5"]);
        assert_eq!(values(" 10..=0:-5 "), vec!["10", "5", "0"]);
        assert!(values("3..3").is_empty());
        assert_eq!(values("3..=3"), vec!["3"]);
    }

    #[test]
    fn test_decimal_precision() {
        assert_eq!(
            values("0..=1:0.25"),
            vec!["0.00", "0.25", "0.50", "0.75", "1.00"]
        );
        assert_eq!(values("0.1..0.4:0.1"), vec!["0.1", "0.2", "0.3"]);
        assert_eq!(values("-1.0..=1"), vec!["-1.0", "0.0", "1.0"]);
    }

    #[test]
    fn test_lists() {
        assert_eq!(values("[a, b, c]"), vec!["a", "b", "c"]);
        assert_eq!(values("['low', \"high\"]"), vec!["low", "high"]);
        assert_eq!(values("1.5, 2,3"), vec!["1.5", "2", "3"]);
        assert_eq!(values("single"), vec!["single"]);
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["", "[]", "0..5:0", "5..0", "0..5:-1", "a..b", "0..1:x", "0..inf"] {
            let err = expand(expr).unwrap_err();
            assert!(matches!(err, TaskError::Range { .. }), "{}", expr);
        }
    }
}
