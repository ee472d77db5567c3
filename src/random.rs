
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use rand::prelude::*;
use tracing::debug;

/// Seed installed before the first explicit call to [`seed`]
const DEFAULT_SEED: u64 = 0;

/// The process-wide random source consumed by every sampling operation.
///
/// Sampling calls lock the source exactly once and draw a fixed number of
/// variates under that lock (each family documents its count), so replaying
/// the same sequence of calls after [`seed`] reproduces bit-identical values.
/// The lock also keeps concurrent samplers from corrupting each other's
/// stream, though interleaved draws from several threads are of course not
/// reproducible; reproducibility-sensitive callers run single-threaded.
fn source() -> &'static Mutex<StdRng> {
    static SOURCE: OnceLock<Mutex<StdRng>> = OnceLock::new();
    SOURCE.get_or_init( || Mutex::new( StdRng::seed_from_u64( DEFAULT_SEED )))
}

/// Resets the shared random source to a fixed seed.
///
/// Reset before any reproducibility-sensitive sequence of draws, never
/// mid-sequence.
pub fn seed( value: u64 ) {
    debug!( "reseeding shared random source with {value}" );
    let mut generator = lock();
    *generator = StdRng::seed_from_u64( value );
}

/// Acquires the shared random source for a burst of draws.
pub fn lock() -> MutexGuard<'static, StdRng> {
    // a poisoned source is still a valid generator state
    source().lock().unwrap_or_else( PoisonError::into_inner )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seed_replays_draws() {
	let _source = crate::conformance::hold_sampling_lock();
	seed( 99 );
	let first: Vec<u64> = (0 .. 5).map( |_| lock().gen() ).collect();
	seed( 99 );
	let second: Vec<u64> = (0 .. 5).map( |_| lock().gen() ).collect();
	assert_eq!( first, second );
    }
}
