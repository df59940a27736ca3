// File: src/builtins.rs
//
// Native functions registered into the global namespace at VM startup.
// Natives are arity-agnostic: they receive whatever argument window the call
// pushed and signal misuse by returning nil.

use chrono::Utc;
use rand::Rng;

use crate::value::Value;

/// Seconds since the Unix epoch, as a double.
pub fn clock(_args: &[Value]) -> Value {
    Value::Number(Utc::now().timestamp_millis() as f64 / 1000.0)
}

/// Uniform double in [0, 1).
pub fn random(_args: &[Value]) -> Value {
    let mut rng = rand::thread_rng();
    Value::Number(rng.gen::<f64>())
}

/// Integral double in [min, max], inclusive on both ends.
pub fn random_int(args: &[Value]) -> Value {
    match (args.first().copied(), args.get(1).copied()) {
        (Some(Value::Number(min)), Some(Value::Number(max))) if min <= max => {
            let mut rng = rand::thread_rng();
            Value::Number(rng.gen_range(min as i64..=max as i64) as f64)
        }
        _ => Value::Nil,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let a = clock(&[]).as_number().unwrap();
        let b = clock(&[]).as_number().unwrap();
        assert!(a > 1_000_000_000.0);
        assert!(b >= a);
    }

    #[test]
    fn test_random_is_in_unit_interval() {
        for _ in 0..100 {
            let n = random(&[]).as_number().unwrap();
            assert!((0.0..1.0).contains(&n));
        }
    }

    #[test]
    fn test_random_int_respects_bounds() {
        for _ in 0..100 {
            let n = random_int(&[Value::Number(2.0), Value::Number(5.0)]).as_number().unwrap();
            assert!((2.0..=5.0).contains(&n));
            assert_eq!(n, n.trunc());
        }
    }

    #[test]
    fn test_random_int_rejects_bad_arguments() {
        assert_eq!(random_int(&[]), Value::Nil);
        assert_eq!(random_int(&[Value::Number(1.0)]), Value::Nil);
        assert_eq!(random_int(&[Value::Nil, Value::Number(1.0)]), Value::Nil);
        assert_eq!(random_int(&[Value::Number(5.0), Value::Number(2.0)]), Value::Nil);
    }
}
