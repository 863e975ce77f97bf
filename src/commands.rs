//! # Cuerpos de jobs de ejemplo
//! src/commands.rs
//!
//! Trabajos concretos que usa el binario de demo. Cada uno es una función
//! `(&[Value], &Map<String, Value>) -> Result<Value, JobError>`, así que sirve
//! directamente como cuerpo de un `Job`.
//!
//! Los argumentos se buscan primero por nombre en `kwargs` y, si no están,
//! por posición en `args`.

use crate::error::JobError;
use rand::Rng;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::thread;
use std::time::{Duration, Instant};

type BodyResult = Result<Value, JobError>;

/// Límite para no desbordar u64
const MAX_FIBONACCI: u64 = 90;

/// Latencia máxima de `simulate`
const MAX_SIMULATE_MS: u64 = 30_000;

/// Obtiene el argumento `name` (o el posicional `index`)
fn arg<'a>(args: &'a [Value], kwargs: &'a Map<String, Value>, name: &str, index: usize) -> Option<&'a Value> {
    kwargs.get(name).or_else(|| args.get(index))
}

fn required_u64(args: &[Value], kwargs: &Map<String, Value>, name: &str, index: usize) -> Result<u64, JobError> {
    let value = arg(args, kwargs, name, index)
        .ok_or_else(|| JobError::InvalidArgument(format!("missing required parameter: {}", name)))?;

    value.as_u64().ok_or_else(|| {
        JobError::InvalidArgument(format!("parameter '{}' must be a valid positive integer", name))
    })
}

/// Calcula el N-ésimo número de Fibonacci
///
/// Parámetro: `n` (<= 90)
pub fn fibonacci(args: &[Value], kwargs: &Map<String, Value>) -> BodyResult {
    let n = required_u64(args, kwargs, "n", 0)?;
    if n > MAX_FIBONACCI {
        return Err(JobError::InvalidArgument(format!(
            "parameter 'n' must be <= {} (to avoid overflow)",
            MAX_FIBONACCI
        )));
    }

    Ok(json!({ "n": n, "result": calculate_fibonacci(n) }))
}

/// Versión iterativa
fn calculate_fibonacci(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}

/// Test de primalidad
///
/// Parámetro: `n`. Responde `{"n": .., "is_prime": .., "elapsed_ms": ..}`.
pub fn is_prime(args: &[Value], kwargs: &Map<String, Value>) -> BodyResult {
    let n = required_u64(args, kwargs, "n", 0)?;
    let start = Instant::now();
    let prime = miller_rabin(n);

    Ok(json!({
        "n": n,
        "is_prime": prime,
        "elapsed_ms": start.elapsed().as_millis() as u64,
    }))
}

/// Miller-Rabin determinista para u64
fn miller_rabin(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n == 2 || n == 3 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }

    // n-1 = 2^r * d
    let mut d = n - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }

    let witnesses: &[u64] = if n < 2_047 {
        &[2]
    } else if n < 1_373_653 {
        &[2, 3]
    } else if n < 25_326_001 {
        &[2, 3, 5]
    } else if n < 4_759_123_141 {
        &[2, 7, 61]
    } else {
        &[2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37]
    };

    'witness: for &a in witnesses {
        if a % n == 0 {
            continue;
        }

        let mut x = mod_pow(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }

        for _ in 1..r {
            x = mod_mul(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

fn mod_pow(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut result = 1u64;
    base %= modulus;

    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_mul(result, base, modulus);
        }
        exp >>= 1;
        base = mod_mul(base, base, modulus);
    }

    result
}

/// (a * b) % m sin overflow
fn mod_mul(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

/// Hash SHA-256 de un texto
///
/// Parámetro: `text`
pub fn sha256(args: &[Value], kwargs: &Map<String, Value>) -> BodyResult {
    let text = arg(args, kwargs, "text", 0)
        .ok_or_else(|| JobError::InvalidArgument("missing required parameter: text".to_string()))?
        .as_str()
        .ok_or_else(|| JobError::InvalidArgument("parameter 'text' must be a string".to_string()))?;

    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    Ok(json!({ "text": text, "hash": hex, "algorithm": "sha256" }))
}

/// Simula una llamada remota con latencia aleatoria
///
/// Parámetros: `max_ms` (requerido, <= 30000) y `task` (opcional).
/// Duerme entre 0 y `max_ms` milisegundos.
pub fn simulate(args: &[Value], kwargs: &Map<String, Value>) -> BodyResult {
    let max_ms = required_u64(args, kwargs, "max_ms", 0)?;
    if max_ms > MAX_SIMULATE_MS {
        return Err(JobError::InvalidArgument(format!(
            "parameter 'max_ms' must be <= {}",
            MAX_SIMULATE_MS
        )));
    }

    let task = arg(args, kwargs, "task", 1)
        .and_then(Value::as_str)
        .unwrap_or("simulation")
        .to_string();

    let latency = rand::thread_rng().gen_range(0..=max_ms);
    let start = Instant::now();
    thread::sleep(Duration::from_millis(latency));

    Ok(json!({
        "task": task,
        "latency_ms": latency,
        "elapsed_ms": start.elapsed().as_millis() as u64,
    }))
}

/// Siempre falla. Parámetro opcional: `reason`.
pub fn fail(args: &[Value], kwargs: &Map<String, Value>) -> BodyResult {
    let reason = arg(args, kwargs, "reason", 0)
        .and_then(Value::as_str)
        .unwrap_or("simulated failure");
    Err(JobError::failed(reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_fibonacci() {
        assert_eq!(calculate_fibonacci(0), 0);
        assert_eq!(calculate_fibonacci(1), 1);
        assert_eq!(calculate_fibonacci(10), 55);
        assert_eq!(calculate_fibonacci(20), 6765);
    }

    #[test]
    fn test_fibonacci_body_reads_kwargs_and_args() {
        let out = fibonacci(&[], &kw(&[("n", json!(10))])).unwrap();
        assert_eq!(out["result"], 55);

        let out = fibonacci(&[json!(12)], &Map::new()).unwrap();
        assert_eq!(out["result"], 144);
    }

    #[test]
    fn test_fibonacci_rejects_bad_input() {
        assert!(matches!(
            fibonacci(&[], &Map::new()),
            Err(JobError::InvalidArgument(_))
        ));
        assert!(matches!(
            fibonacci(&[json!("ten")], &Map::new()),
            Err(JobError::InvalidArgument(_))
        ));
        assert!(matches!(
            fibonacci(&[json!(91)], &Map::new()),
            Err(JobError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_miller_rabin() {
        assert!(!miller_rabin(0));
        assert!(!miller_rabin(1));
        assert!(miller_rabin(2));
        assert!(miller_rabin(97));
        assert!(!miller_rabin(100));
        assert!(!miller_rabin(561)); // Carmichael
        assert!(miller_rabin(1_000_000_007));
        assert!(miller_rabin(18_446_744_073_709_551_557)); // Mayor primo u64
        assert!(!miller_rabin(3_215_031_751));
    }

    #[test]
    fn test_is_prime_body() {
        let out = is_prime(&[json!(7919)], &Map::new()).unwrap();
        assert_eq!(out["is_prime"], true);
    }

    #[test]
    fn test_sha256() {
        let out = sha256(&[json!("hello")], &Map::new()).unwrap();
        assert_eq!(
            out["hash"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(matches!(
            sha256(&[json!(1)], &Map::new()),
            Err(JobError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_simulate_respects_bound() {
        let out = simulate(&[], &kw(&[("max_ms", json!(5)), ("task", json!("ping"))])).unwrap();
        assert_eq!(out["task"], "ping");
        assert!(out["latency_ms"].as_u64().unwrap() <= 5);

        assert!(simulate(&[json!(MAX_SIMULATE_MS + 1)], &Map::new()).is_err());
    }

    #[test]
    fn test_fail_always_fails() {
        assert_eq!(fail(&[], &Map::new()), Err(JobError::failed("simulated failure")));
        assert_eq!(
            fail(&[], &kw(&[("reason", json!("boom"))])),
            Err(JobError::failed("boom"))
        );
    }
}
