use std::num::NonZeroUsize;

/// Minimum number of concurrent fetch or match jobs.
const MIN_BATCH_SIZE: usize = 8;

/// Concurrency limit for network-bound fan-out: four jobs per CPU, at least eight.
pub fn batch_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    cpus.saturating_mul(4).max(MIN_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_has_floor() {
        assert!(batch_size() >= MIN_BATCH_SIZE);
        assert_eq!(batch_size() % 4, 0);
    }
}
