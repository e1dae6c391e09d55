use crate::processor::Processor;
use crate::processor::error::{ErrorKind, Result};
use exn::ResultExt;

/// Reports whether each line holds a prime number.
///
/// Surrounding whitespace is ignored. Anything that is not a signed 64-bit
/// integer, including a blank line, fails the line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimeNumberProcessor;

impl PrimeNumberProcessor {
    pub fn is_prime(n: i64) -> bool {
        if n < 2 {
            return false;
        }
        if n < 4 {
            return true;
        }
        if n % 2 == 0 {
            return false;
        }
        // Compare via division so `i * i` never overflows near i64::MAX.
        let mut i = 3;
        while i <= n / i {
            if n % i == 0 {
                return false;
            }
            i += 2;
        }
        true
    }
}

impl Processor for PrimeNumberProcessor {
    type Output = bool;

    fn process(&self, line: &str) -> Result<bool> {
        let trimmed = line.trim();
        let n = trimmed.parse::<i64>().or_raise(|| ErrorKind::Malformed(trimmed.to_string()))?;
        let prime = Self::is_prime(n);
        tracing::info!(n, prime, "{n} is {}prime", if prime { "" } else { "not " });
        Ok(prime)
    }
}
