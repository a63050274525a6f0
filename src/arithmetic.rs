// ABOUTME: Numeric coercion, widening lattice, and arithmetic/comparison operators

use crate::error::{JexlError, Position};
use crate::value::Value;
use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;
use std::rc::Rc;
use std::str::FromStr;

/// Precision/rounding/scale knobs for `/`, mirroring a host engine's
/// `MathContext`: left at the default, division behaves as if unconfigured
/// (`Float64` result); once a scale is set, division widens to `BigDec`
/// and rounds to that scale instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MathConfig {
    pub scale: Option<i64>,
    pub rounding: RoundingMode,
}

impl Default for MathConfig {
    fn default() -> Self {
        MathConfig { scale: None, rounding: RoundingMode::HalfUp }
    }
}

impl MathConfig {
    pub fn is_configured(&self) -> bool {
        self.scale.is_some()
    }

    fn round(&self, value: BigDecimal) -> BigDecimal {
        match self.scale {
            Some(scale) => value.with_scale_round(scale, self.rounding),
            None => value,
        }
    }
}

/// Widening rank used to pick the common type two numeric operands are
/// coerced to before an arithmetic/comparison op, following the
/// lattice `Int64 < Float64 < BigInt < BigDec` (BigInt and Float64 both
/// widen to BigDec when mixed, since neither can represent the other
/// exactly). Coerces at the boundary of each operation rather than
/// carrying mixed-rank values through, generalized from a single `f64`
/// rung to the full four-rung lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Int64,
    Float64,
    BigInt,
    BigDec,
}

fn rank(v: &Value) -> Option<Rank> {
    match v {
        Value::Int64(_) => Some(Rank::Int64),
        Value::Float64(_) => Some(Rank::Float64),
        Value::BigInt(_) => Some(Rank::BigInt),
        Value::BigDec(_) => Some(Rank::BigDec),
        _ => None,
    }
}

fn to_bigdecimal(v: &Value) -> BigDecimal {
    match v {
        Value::Int64(i) => BigDecimal::from(*i),
        Value::Float64(f) => BigDecimal::from_str(&f.to_string()).unwrap_or_else(|_| BigDecimal::from(0)),
        Value::BigInt(b) => BigDecimal::from(b.clone()),
        Value::BigDec(b) => b.clone(),
        _ => BigDecimal::from(0),
    }
}

fn to_bigint(v: &Value) -> BigInt {
    match v {
        Value::Int64(i) => BigInt::from(*i),
        Value::BigInt(b) => b.clone(),
        _ => BigInt::from(0),
    }
}

fn to_f64(v: &Value) -> f64 {
    match v {
        Value::Int64(i) => *i as f64,
        Value::Float64(f) => *f,
        Value::BigInt(b) => b.to_f64().unwrap_or(f64::NAN),
        Value::BigDec(b) => b.to_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Null policy: `null` widens to the zero of whatever rung
/// the other operand occupies for `+ - * /`, except `null + null`, which
/// stays `null` (handled by the caller before this widening kicks in).
fn widen_pair(a: &Value, b: &Value) -> Option<(Rank, Value, Value)> {
    let ra = rank(a);
    let rb = rank(b);
    match (ra, rb, a.is_null(), b.is_null()) {
        (Some(r), None, _, true) => Some((r, a.clone(), zero_of(r))),
        (None, Some(r), true, _) => Some((r, zero_of(r), b.clone())),
        (Some(ra), Some(rb), _, _) => {
            let r = ra.max(rb);
            Some((r, a.clone(), b.clone()))
        }
        _ => None,
    }
}

fn zero_of(r: Rank) -> Value {
    match r {
        Rank::Int64 => Value::Int64(0),
        Rank::Float64 => Value::Float64(0.0),
        Rank::BigInt => Value::BigInt(BigInt::zero()),
        Rank::BigDec => Value::BigDec(BigDecimal::from(0)),
    }
}

macro_rules! numeric_binop {
    ($name:ident, $int_op:tt, $checked:ident) => {
        pub fn $name(lhs: &Value, rhs: &Value, pos: Position) -> Result<Value, JexlError> {
            if lhs.is_null() && rhs.is_null() {
                return Ok(Value::Null);
            }
            let (r, a, b) = widen_pair(lhs, rhs)
                .ok_or_else(|| JexlError::coercion(lhs.type_name(), rhs.type_name(), pos))?;
            match r {
                Rank::Int64 => {
                    let (ai, bi) = (as_i64(&a), as_i64(&b));
                    match ai.$checked(bi) {
                        Some(v) => Ok(Value::Int64(v)),
                        // overflow widens to BigInt rather than erroring,
                        // matching the lattice's "promote on overflow" rule.
                        None => Ok(Value::BigInt(to_bigint(&a) $int_op to_bigint(&b))),
                    }
                }
                Rank::Float64 => Ok(Value::Float64(to_f64(&a) $int_op to_f64(&b))),
                Rank::BigInt => Ok(Value::BigInt(to_bigint(&a) $int_op to_bigint(&b))),
                Rank::BigDec => Ok(Value::BigDec(to_bigdecimal(&a) $int_op to_bigdecimal(&b))),
            }
        }
    };
}

fn as_i64(v: &Value) -> i64 {
    match v {
        Value::Int64(i) => *i,
        _ => 0,
    }
}

numeric_binop!(add_numeric, +, checked_add);
numeric_binop!(sub_numeric, -, checked_sub);
numeric_binop!(mul_numeric, *, checked_mul);

/// `+` numeric addition when both sides are numeric-or-null, string
/// concatenation when either side is a string (the other coerced via
/// `Display`) and `strict_arithmetic` is off. Under `strict_arithmetic`,
/// a numeric-looking string (`"2"`, `"3.5"`) is instead coerced to a
/// number and added numerically; a non-numeric string is a coercion
/// error rather than silently concatenating.
pub fn add(lhs: &Value, rhs: &Value, pos: Position, strict_arithmetic: bool) -> Result<Value, JexlError> {
    if strict_arithmetic {
        let l = coerce_strict_operand(lhs, pos)?;
        let r = coerce_strict_operand(rhs, pos)?;
        return add_numeric(&l, &r, pos);
    }
    if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
        return Ok(Value::str(format!("{}{}", lhs, rhs)));
    }
    add_numeric(lhs, rhs, pos)
}

/// Under `strict_arithmetic`, a string operand to `+` is coerced to a
/// number if it parses as one, rather than triggering concatenation.
fn coerce_strict_operand(v: &Value, pos: Position) -> Result<Value, JexlError> {
    match v {
        Value::Str(s) => parse_numeric_str(s).ok_or_else(|| JexlError::coercion("string", "number", pos)),
        other => Ok(other.clone()),
    }
}

fn parse_numeric_str(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Int64(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Some(Value::Float64(f));
    }
    None
}

pub fn sub(lhs: &Value, rhs: &Value, pos: Position) -> Result<Value, JexlError> {
    sub_numeric(lhs, rhs, pos)
}

pub fn mul(lhs: &Value, rhs: &Value, pos: Position) -> Result<Value, JexlError> {
    mul_numeric(lhs, rhs, pos)
}

/// `/` always widens to at least `Float64` (true division never
/// truncates) unless `math` carries a configured scale, in which case
/// the result widens all the way to `BigDec` and is rounded to that
/// scale regardless of the operands' own rank; `\` (integer-division)
/// is `div_int`.
pub fn div(lhs: &Value, rhs: &Value, pos: Position, math: MathConfig) -> Result<Value, JexlError> {
    if lhs.is_null() && rhs.is_null() {
        return Ok(Value::Null);
    }
    let (r, a, b) = widen_pair(lhs, rhs).ok_or_else(|| JexlError::coercion(lhs.type_name(), rhs.type_name(), pos))?;
    match r {
        Rank::Int64 | Rank::Float64 => {
            if math.is_configured() {
                let bd = to_bigdecimal(&b);
                if bd.is_zero() {
                    return Err(JexlError::Internal("division by zero".into()));
                }
                Ok(Value::BigDec(math.round(to_bigdecimal(&a) / bd)))
            } else {
                let bf = to_f64(&b);
                if bf == 0.0 {
                    return Err(JexlError::Internal("division by zero".into()));
                }
                Ok(Value::Float64(to_f64(&a) / bf))
            }
        }
        Rank::BigInt => {
            let bb = to_bigint(&b);
            if bb.is_zero() {
                return Err(JexlError::Internal("division by zero".into()));
            }
            Ok(Value::BigDec(math.round(to_bigdecimal(&a) / to_bigdecimal(&b))))
        }
        Rank::BigDec => {
            let bd = to_bigdecimal(&b);
            if bd.is_zero() {
                return Err(JexlError::Internal("division by zero".into()));
            }
            Ok(Value::BigDec(math.round(to_bigdecimal(&a) / bd)))
        }
    }
}

pub fn div_int(lhs: &Value, rhs: &Value, pos: Position) -> Result<Value, JexlError> {
    let (r, a, b) = widen_pair(lhs, rhs).ok_or_else(|| JexlError::coercion(lhs.type_name(), rhs.type_name(), pos))?;
    match r {
        Rank::Int64 => {
            let bi = as_i64(&b);
            if bi == 0 {
                return Err(JexlError::Internal("division by zero".into()));
            }
            Ok(Value::Int64(as_i64(&a) / bi))
        }
        _ => {
            let bb = to_bigint(&b);
            if bb.is_zero() {
                return Err(JexlError::Internal("division by zero".into()));
            }
            Ok(Value::BigInt(to_bigint(&a) / bb))
        }
    }
}

pub fn modulo(lhs: &Value, rhs: &Value, pos: Position) -> Result<Value, JexlError> {
    let (r, a, b) = widen_pair(lhs, rhs).ok_or_else(|| JexlError::coercion(lhs.type_name(), rhs.type_name(), pos))?;
    match r {
        Rank::Int64 => {
            let bi = as_i64(&b);
            if bi == 0 {
                return Err(JexlError::Internal("division by zero".into()));
            }
            Ok(Value::Int64(as_i64(&a) % bi))
        }
        Rank::Float64 => Ok(Value::Float64(to_f64(&a) % to_f64(&b))),
        Rank::BigInt => {
            let bb = to_bigint(&b);
            if bb.is_zero() {
                return Err(JexlError::Internal("division by zero".into()));
            }
            Ok(Value::BigInt(to_bigint(&a) % bb))
        }
        Rank::BigDec => Ok(Value::BigDec(to_bigdecimal(&a) % to_bigdecimal(&b))),
    }
}

pub fn neg(v: &Value, pos: Position) -> Result<Value, JexlError> {
    match v {
        Value::Int64(i) => Ok(Value::Int64(-i)),
        Value::Float64(f) => Ok(Value::Float64(-f)),
        Value::BigInt(b) => Ok(Value::BigInt(-b.clone())),
        Value::BigDec(b) => Ok(Value::BigDec(-b.clone())),
        Value::Null => Ok(Value::Null),
        _ => Err(JexlError::coercion(v.type_name(), "number", pos)),
    }
}

/// Cross-variant numeric comparison used by both `Value`'s `PartialEq`
/// and the interpreter's relational operators.
pub fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    let (ra, rb) = (rank(a)?, rank(b)?);
    let r = ra.max(rb);
    match r {
        Rank::Int64 => as_i64(a).partial_cmp(&as_i64(b)),
        Rank::Float64 => to_f64(a).partial_cmp(&to_f64(b)),
        Rank::BigInt => to_bigint(a).partial_cmp(&to_bigint(b)),
        Rank::BigDec => to_bigdecimal(a).partial_cmp(&to_bigdecimal(b)),
    }
}

/// General relational comparison numeric cross-widening,
/// lexical string comparison, otherwise a coercion error (only `==`/`!=`
/// fall back to host/structural equality for non-numeric, non-string
/// operands).
pub fn compare(a: &Value, b: &Value, pos: Position) -> Result<Ordering, JexlError> {
    if let (Value::Str(sa), Value::Str(sb)) = (a, b) {
        return Ok(sa.as_ref().cmp(sb.as_ref()));
    }
    numeric_cmp(a, b).ok_or_else(|| JexlError::coercion(a.type_name(), b.type_name(), pos))
}

/// Bitwise operators always coerce to `i64`: they are defined only over
/// the Int64 rung, so BigInt/BigDec operands are truncated.
pub fn bit_and(a: &Value, b: &Value) -> Value {
    Value::Int64(as_i64_lossy(a) & as_i64_lossy(b))
}

pub fn bit_or(a: &Value, b: &Value) -> Value {
    Value::Int64(as_i64_lossy(a) | as_i64_lossy(b))
}

pub fn bit_xor(a: &Value, b: &Value) -> Value {
    Value::Int64(as_i64_lossy(a) ^ as_i64_lossy(b))
}

pub fn shl(a: &Value, b: &Value) -> Value {
    Value::Int64(as_i64_lossy(a).wrapping_shl(as_i64_lossy(b) as u32))
}

pub fn shr(a: &Value, b: &Value) -> Value {
    Value::Int64(as_i64_lossy(a).wrapping_shr(as_i64_lossy(b) as u32))
}

fn as_i64_lossy(v: &Value) -> i64 {
    match v {
        Value::Int64(i) => *i,
        Value::Float64(f) => *f as i64,
        Value::BigInt(b) => b.to_i64().unwrap_or(0),
        Value::BigDec(b) => b.to_i64().unwrap_or(0),
        _ => 0,
    }
}

/// `=~`/`matches` operator backing. No `regex` dependency is carried,
/// so this implements only a glob-style subset (`*` any run of
/// characters, `?` any single character) as the builtin default; a host
/// wanting full regex support supplies its own via a namespace function.
pub fn glob_matches(subject: &str, pattern: &str) -> bool {
    fn helper(s: &[u8], p: &[u8]) -> bool {
        match (s.first(), p.first()) {
            (_, Some(b'*')) => helper(s, &p[1..]) || (!s.is_empty() && helper(&s[1..], p)),
            (Some(_), Some(b'?')) => helper(&s[1..], &p[1..]),
            (Some(sc), Some(pc)) => sc == pc && helper(&s[1..], &p[1..]),
            (None, None) => true,
            (None, Some(b'*')) => helper(s, &p[1..]),
            _ => false,
        }
    }
    helper(subject.as_bytes(), pattern.as_bytes())
}

pub fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(a) => a.iter().any(|v| v == needle),
        Value::Set(s) => s.contains(needle),
        Value::Map(m) => m.contains_key(needle),
        Value::Str(s) => {
            if let Value::Str(n) = needle {
                s.contains(n.as_ref())
            } else {
                false
            }
        }
        _ => false,
    }
}

pub fn concat_str(parts: &[Rc<str>]) -> Value {
    Value::str(parts.iter().map(|s| s.as_ref()).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_int_int() {
        let r = add(&Value::Int64(1), &Value::Int64(2), Position::default(), false).unwrap();
        assert_eq!(r, Value::Int64(3));
    }

    #[test]
    fn test_add_string_concat() {
        let r = add(&Value::str("a"), &Value::Int64(1), Position::default(), false).unwrap();
        assert_eq!(r, Value::str("a1"));
    }

    #[test]
    fn test_add_null_with_number_widens_to_zero() {
        let r = add(&Value::Null, &Value::Int64(5), Position::default(), false).unwrap();
        assert_eq!(r, Value::Int64(5));
    }

    #[test]
    fn test_add_null_null_stays_null() {
        let r = add(&Value::Null, &Value::Null, Position::default(), false).unwrap();
        assert_eq!(r, Value::Null);
    }

    #[test]
    fn test_int_overflow_promotes_to_bigint() {
        let r = add(&Value::Int64(i64::MAX), &Value::Int64(1), Position::default(), false).unwrap();
        assert!(matches!(r, Value::BigInt(_)));
    }

    #[test]
    fn test_mixed_int_float_widens_to_float() {
        let r = add(&Value::Int64(1), &Value::Float64(0.5), Position::default(), false).unwrap();
        assert_eq!(r, Value::Float64(1.5));
    }

    #[test]
    fn test_strict_arithmetic_coerces_numeric_string() {
        let r = add(&Value::Int64(1), &Value::str("2"), Position::default(), true).unwrap();
        assert_eq!(r, Value::Int64(3));
    }

    #[test]
    fn test_strict_arithmetic_rejects_non_numeric_string() {
        let r = add(&Value::Int64(1), &Value::str("two"), Position::default(), true);
        assert!(r.is_err());
    }

    #[test]
    fn test_non_strict_arithmetic_concatenates_numeric_string() {
        let r = add(&Value::Int64(1), &Value::str("2"), Position::default(), false).unwrap();
        assert_eq!(r, Value::str("12"));
    }

    #[test]
    fn test_div_is_float_even_for_ints() {
        let r = div(&Value::Int64(7), &Value::Int64(2), Position::default(), MathConfig::default()).unwrap();
        assert_eq!(r, Value::Float64(3.5));
    }

    #[test]
    fn test_div_with_configured_scale_produces_rounded_bigdec() {
        let math = MathConfig { scale: Some(2), rounding: RoundingMode::HalfUp };
        let r = div(&Value::Int64(7), &Value::Int64(3), Position::default(), math).unwrap();
        match r {
            Value::BigDec(d) => assert_eq!(d.to_string(), "2.33"),
            other => panic!("expected BigDec, got {:?}", other),
        }
    }

    #[test]
    fn test_div_int_truncates() {
        let r = div_int(&Value::Int64(7), &Value::Int64(2), Position::default()).unwrap();
        assert_eq!(r, Value::Int64(3));
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("hello.txt", "*.txt"));
        assert!(!glob_matches("hello.rs", "*.txt"));
        assert!(glob_matches("cat", "c?t"));
    }

    #[test]
    fn test_contains_array() {
        let arr = Value::array(vec![Value::Int64(1), Value::Int64(2)]);
        assert!(contains(&arr, &Value::Int64(2)));
        assert!(!contains(&arr, &Value::Int64(3)));
    }
}
