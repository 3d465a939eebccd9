//! Formula evaluation.

use std::cmp::Ordering;
use std::fmt;

use super::parser::{BinaryOp, Expr};
use super::FormulaError;

/// A formula result.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::Bool(true) => f.write_str("TRUE"),
            Self::Bool(false) => f.write_str("FALSE"),
        }
    }
}

impl FormulaValue {
    fn to_number(&self) -> Result<f64, FormulaError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| FormulaError::InvalidValue(format!("\"{}\" is not a number", s))),
        }
    }

    fn to_bool(&self) -> Result<bool, FormulaError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
            Self::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
            Self::Text(s) => Err(FormulaError::InvalidValue(format!(
                "\"{}\" is not a logical value",
                s
            ))),
        }
    }

    /// Spreadsheet ordering across types: numbers < text < booleans.
    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Bool(_) => 2,
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Text(a), Self::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Evaluate a parsed formula.
pub fn evaluate(expr: &Expr) -> Result<FormulaValue, FormulaError> {
    let value = eval(expr)?;
    if let FormulaValue::Number(n) = value {
        if !n.is_finite() {
            return Err(FormulaError::InvalidNumber("result is not finite".into()));
        }
    }
    Ok(value)
}

fn eval(expr: &Expr) -> Result<FormulaValue, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(FormulaValue::Number(*n)),
        Expr::Text(s) => Ok(FormulaValue::Text(s.clone())),
        Expr::Bool(b) => Ok(FormulaValue::Bool(*b)),
        Expr::Negate(inner) => Ok(FormulaValue::Number(-eval(inner)?.to_number()?)),
        Expr::Percent(inner) => Ok(FormulaValue::Number(eval(inner)?.to_number()? / 100.0)),
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs)?, eval(rhs)?),
        Expr::Call(name, args) => call(name, args),
    }
}

fn binary(op: BinaryOp, lhs: FormulaValue, rhs: FormulaValue) -> Result<FormulaValue, FormulaError> {
    use FormulaValue::{Bool, Number, Text};

    let result = match op {
        BinaryOp::Add => Number(lhs.to_number()? + rhs.to_number()?),
        BinaryOp::Sub => Number(lhs.to_number()? - rhs.to_number()?),
        BinaryOp::Mul => Number(lhs.to_number()? * rhs.to_number()?),
        BinaryOp::Div => {
            let divisor = rhs.to_number()?;
            if divisor == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            Number(lhs.to_number()? / divisor)
        }
        BinaryOp::Pow => {
            let value = lhs.to_number()?.powf(rhs.to_number()?);
            if !value.is_finite() {
                return Err(FormulaError::InvalidNumber("power result is not a real number".into()));
            }
            Number(value)
        }
        BinaryOp::Concat => Text(format!("{}{}", lhs, rhs)),
        BinaryOp::Eq => Bool(lhs.compare(&rhs) == Ordering::Equal),
        BinaryOp::Ne => Bool(lhs.compare(&rhs) != Ordering::Equal),
        BinaryOp::Lt => Bool(lhs.compare(&rhs) == Ordering::Less),
        BinaryOp::Le => Bool(lhs.compare(&rhs) != Ordering::Greater),
        BinaryOp::Gt => Bool(lhs.compare(&rhs) == Ordering::Greater),
        BinaryOp::Ge => Bool(lhs.compare(&rhs) != Ordering::Less),
    };
    Ok(result)
}

fn arity(name: &str, args: &[Expr], min: usize, max: Option<usize>) -> Result<(), FormulaError> {
    let ok = args.len() >= min && max.map_or(true, |max| args.len() <= max);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(max) if max == min => format!("{}", min),
        Some(max) => format!("{} to {}", min, max),
        None => format!("at least {}", min),
    };
    Err(FormulaError::Arity {
        function: name.to_string(),
        expected,
        found: args.len(),
    })
}

fn numbers(args: &[Expr]) -> Result<Vec<f64>, FormulaError> {
    args.iter().map(|arg| eval(arg)?.to_number()).collect()
}

fn text_arg(args: &[Expr], index: usize) -> Result<String, FormulaError> {
    Ok(eval(&args[index])?.to_string())
}

fn count_arg(args: &[Expr], index: usize, default: usize) -> Result<usize, FormulaError> {
    match args.get(index) {
        None => Ok(default),
        Some(arg) => {
            let n = eval(arg)?.to_number()?.trunc();
            if n < 0.0 {
                return Err(FormulaError::InvalidValue(format!("negative count {}", n)));
            }
            Ok(n as usize)
        }
    }
}

fn call(name: &str, args: &[Expr]) -> Result<FormulaValue, FormulaError> {
    use FormulaValue::{Bool, Number, Text};

    let value = match name {
        "SUM" => Number(numbers(args)?.iter().sum()),
        "AVERAGE" => {
            arity(name, args, 1, None)?;
            let values = numbers(args)?;
            Number(values.iter().sum::<f64>() / values.len() as f64)
        }
        "MIN" => Number(numbers(args)?.into_iter().reduce(f64::min).unwrap_or(0.0)),
        "MAX" => Number(numbers(args)?.into_iter().reduce(f64::max).unwrap_or(0.0)),
        "ABS" => {
            arity(name, args, 1, Some(1))?;
            Number(eval(&args[0])?.to_number()?.abs())
        }
        "INT" => {
            arity(name, args, 1, Some(1))?;
            Number(eval(&args[0])?.to_number()?.floor())
        }
        "ROUND" => {
            arity(name, args, 1, Some(2))?;
            let value = eval(&args[0])?.to_number()?;
            let digits = match args.get(1) {
                Some(arg) => eval(arg)?.to_number()?.trunc() as i32,
                None => 0,
            };
            let scale = 10f64.powi(digits);
            Number((value * scale).round() / scale)
        }
        "MOD" => {
            arity(name, args, 2, Some(2))?;
            let n = eval(&args[0])?.to_number()?;
            let d = eval(&args[1])?.to_number()?;
            if d == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            Number(n - d * (n / d).floor())
        }
        "POWER" => {
            arity(name, args, 2, Some(2))?;
            return binary(BinaryOp::Pow, eval(&args[0])?, eval(&args[1])?);
        }
        "SQRT" => {
            arity(name, args, 1, Some(1))?;
            let value = eval(&args[0])?.to_number()?;
            if value < 0.0 {
                return Err(FormulaError::InvalidNumber(format!("SQRT of negative number {}", value)));
            }
            Number(value.sqrt())
        }
        "PI" => {
            arity(name, args, 0, Some(0))?;
            Number(std::f64::consts::PI)
        }
        "IF" => {
            arity(name, args, 2, Some(3))?;
            if eval(&args[0])?.to_bool()? {
                eval(&args[1])?
            } else {
                match args.get(2) {
                    Some(otherwise) => eval(otherwise)?,
                    None => Bool(false),
                }
            }
        }
        "AND" => {
            arity(name, args, 1, None)?;
            let mut all = true;
            for arg in args {
                all &= eval(arg)?.to_bool()?;
            }
            Bool(all)
        }
        "OR" => {
            arity(name, args, 1, None)?;
            let mut any = false;
            for arg in args {
                any |= eval(arg)?.to_bool()?;
            }
            Bool(any)
        }
        "NOT" => {
            arity(name, args, 1, Some(1))?;
            Bool(!eval(&args[0])?.to_bool()?)
        }
        "CONCATENATE" => {
            arity(name, args, 1, None)?;
            let mut out = String::new();
            for arg in args {
                out.push_str(&eval(arg)?.to_string());
            }
            Text(out)
        }
        "LEN" => {
            arity(name, args, 1, Some(1))?;
            Number(text_arg(args, 0)?.chars().count() as f64)
        }
        "UPPER" => {
            arity(name, args, 1, Some(1))?;
            Text(text_arg(args, 0)?.to_uppercase())
        }
        "LOWER" => {
            arity(name, args, 1, Some(1))?;
            Text(text_arg(args, 0)?.to_lowercase())
        }
        "TRIM" => {
            arity(name, args, 1, Some(1))?;
            Text(text_arg(args, 0)?.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        "LEFT" => {
            arity(name, args, 1, Some(2))?;
            let text = text_arg(args, 0)?;
            let count = count_arg(args, 1, 1)?;
            Text(text.chars().take(count).collect())
        }
        "RIGHT" => {
            arity(name, args, 1, Some(2))?;
            let text = text_arg(args, 0)?;
            let count = count_arg(args, 1, 1)?;
            let len = text.chars().count();
            Text(text.chars().skip(len.saturating_sub(count)).collect())
        }
        "MID" => {
            arity(name, args, 3, Some(3))?;
            let text = text_arg(args, 0)?;
            let start = eval(&args[1])?.to_number()?.trunc();
            if start < 1.0 {
                return Err(FormulaError::InvalidValue(format!("MID start {} is below 1", start)));
            }
            let count = count_arg(args, 2, 0)?;
            Text(text.chars().skip(start as usize - 1).take(count).collect())
        }
        _ => return Err(FormulaError::UnknownFunction(name.to_string())),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn run(source: &str) -> Result<FormulaValue, FormulaError> {
        evaluate(&parse(source)?)
    }

    fn number(source: &str) -> f64 {
        match run(source).unwrap() {
            FormulaValue::Number(n) => n,
            other => panic!("expected number from {}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(number("=1+1"), 2.0);
        assert_eq!(number("=2*3+4/2"), 8.0);
        assert_eq!(number("=-2^2"), 4.0);
        assert_eq!(number("=2^3^2"), 64.0);
        assert_eq!(number("=50%"), 0.5);
        assert_eq!(number("=\"3\"+TRUE"), 4.0);
    }

    #[test]
    fn test_functions() {
        assert_eq!(number("=SUM(1,2,3)"), 6.0);
        assert_eq!(number("=AVERAGE(2;4)"), 3.0);
        assert_eq!(number("=MAX(1, 9, 3) - MIN(4, 2)"), 7.0);
        assert_eq!(number("=ROUND(2.346, 2)"), 2.35);
        assert_eq!(number("=ROUND(-2.5)"), -3.0);
        assert_eq!(number("=INT(-1.5)"), -2.0);
        assert_eq!(number("=MOD(-3, 2)"), 1.0);
        assert_eq!(number("=LEN(\"héllo\")"), 5.0);
        assert_eq!(number("=SQRT(POWER(3,2)+16)"), 5.0);
    }

    #[test]
    fn test_text_and_logic() {
        assert_eq!(
            run("=CONCATENATE(\"a\", 1, TRUE)").unwrap(),
            FormulaValue::Text("a1TRUE".into())
        );
        assert_eq!(run("=\"x\"&2.5").unwrap(), FormulaValue::Text("x2.5".into()));
        assert_eq!(run("=UPPER(TRIM(\"  big   cat \"))").unwrap(), FormulaValue::Text("BIG CAT".into()));
        assert_eq!(run("=MID(\"gateway\", 2, 3)").unwrap(), FormulaValue::Text("ate".into()));
        assert_eq!(run("=RIGHT(\"gateway\", 3)").unwrap(), FormulaValue::Text("way".into()));
        assert_eq!(run("=LEFT(\"gateway\")").unwrap(), FormulaValue::Text("g".into()));
        assert_eq!(run("=IF(2>1, \"yes\", \"no\")").unwrap(), FormulaValue::Text("yes".into()));
        assert_eq!(run("=IF(FALSE, 1)").unwrap(), FormulaValue::Bool(false));
        assert_eq!(run("=AND(1, TRUE, NOT(FALSE))").unwrap(), FormulaValue::Bool(true));
        assert_eq!(run("=\"abc\"=\"ABC\"").unwrap(), FormulaValue::Bool(true));
        assert_eq!(run("=1<\"a\"").unwrap(), FormulaValue::Bool(true));
    }

    #[test]
    fn test_if_only_evaluates_taken_branch() {
        assert_eq!(number("=IF(TRUE, 1, 1/0)"), 1.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(run("=1/0"), Err(FormulaError::DivisionByZero));
        assert_eq!(run("=MOD(1, 0)"), Err(FormulaError::DivisionByZero));
        assert!(matches!(run("=NOPE(1)"), Err(FormulaError::UnknownFunction(_))));
        assert!(matches!(run("=\"a\"*2"), Err(FormulaError::InvalidValue(_))));
        assert!(matches!(run("=SQRT(-1)"), Err(FormulaError::InvalidNumber(_))));
        assert!(matches!(run("=(-8)^0.5"), Err(FormulaError::InvalidNumber(_))));
        assert!(matches!(run("=ABS(1, 2)"), Err(FormulaError::Arity { found: 2, .. })));
        assert!(matches!(run("=AVERAGE()"), Err(FormulaError::Arity { .. })));
    }
}
