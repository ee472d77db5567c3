
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::prelude::*;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde_json::Value;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use crate::model::{Model, Record};
use crate::random;

/// Length of the sampled sequences driving the add/remove checks
pub const DATA_COUNT: usize = 20;
/// Number of draws behind each goodness-of-fit decision
pub const SAMPLE_COUNT: usize = 1000;
/// Generous fit threshold so a correct sampler never trips it
pub const MIN_GOODNESS_OF_FIT: f64 = 1e-3;

/// Tolerance policy for every closeness check: two reals agree when their
/// difference is below `ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * scale`,
/// with scale the larger magnitude. The hybrid absorbs both cancellation
/// near zero and the growth of log-gamma magnitudes.
pub const ABSOLUTE_TOLERANCE: f64 = 1e-8;
pub const RELATIVE_TOLERANCE: f64 = 1e-6;

static SAMPLING: Mutex<()> = Mutex::new( () );

/// Checks closeness up to an explicit margin
#[macro_export]
macro_rules! assert_approx {
    ($real:expr, $expected:expr, $delta:expr) => {
	if $real < $expected - $delta || $real > $expected + $delta {
	    panic!( "Violate {:.6} == {:.6} (+-{:.6})", $real, $expected, $delta );
	}
    }
}

/// Grants exclusive use of the shared random source.
///
/// Every check or test that seeds or draws must hold this guard for its
/// whole duration, so that concurrently running tests cannot interleave
/// draws and break replay. Do not acquire it around a call that takes it
/// itself.
pub fn hold_sampling_lock() -> MutexGuard<'static, ()> {
    SAMPLING.lock().unwrap_or_else( PoisonError::into_inner )
}

/// Asserts that two structured records agree up to the tolerance policy
pub fn assert_record_close( left: &Record, right: &Record ) {
    assert_record_close_at( left, right, "$" );
}

fn assert_record_close_at( left: &Record, right: &Record, path: &str ) {
    match (left, right) {
	(Value::Object( left_entries ), Value::Object( right_entries )) => {
	    let mut left_keys: Vec<&String> = left_entries.keys().collect();
	    let mut right_keys: Vec<&String> = right_entries.keys().collect();
	    left_keys.sort();
	    right_keys.sort();
	    assert_eq!( left_keys, right_keys, "diverging fields under {path}" );
	    for (key, entry) in left_entries {
		assert_record_close_at( entry, &right_entries[ key ], &format!( "{path}.{key}" ));
	    }
	},
	(Value::Array( left_entries ), Value::Array( right_entries )) => {
	    assert_eq!( left_entries.len(), right_entries.len(), "diverging lengths under {path}" );
	    for (index, entry) in left_entries.iter().enumerate() {
		assert_record_close_at( entry, &right_entries[ index ], &format!( "{path}[{index}]" ));
	    }
	},
	(Value::Number( left_number ), Value::Number( right_number )) => {
	    let left_real = left_number.as_f64().expect( "records hold representable numbers" );
	    let right_real = right_number.as_f64().expect( "records hold representable numbers" );
	    assert!( is_close( left_real, right_real ), "diverging numbers under {path}: {left_real} vs {right_real}" );
	},
	_ => assert_eq!( left, right, "diverging entries under {path}" ),
    }
}

/// Asserts that two log probabilities agree up to the tolerance policy
pub fn assert_scores_close( left: f64, right: f64, context: &str ) {
    assert!( is_close( left, right ), "{context}: {left} vs {right}" );
}

fn is_close( left: f64, right: f64 ) -> bool {
    if left == right {
	return true;
    }
    let scale = left.abs().max( right.abs() );
    ( left - right ).abs() <= ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * scale
}

fn shuffle<T>( values: &mut [T] ) {
    values.shuffle( &mut *random::lock() );
}

/// Exercises the whole contract surface on every fixture: load/dump
/// inverses, additivity of `group_create`, statistics round trips, removal
/// back to the empty state, merge, and the score and sample calls.
pub fn check_interface<M: Model>() {
    let _source = hold_sampling_lock();
    random::seed( 0 );
    let examples = M::examples();
    assert!( !examples.is_empty(), "no examples provided" );
    for (index, example) in examples.iter().enumerate() {
	debug!( "example {}/{} of {}", index + 1, examples.len(), M::FAMILY );
	assert!( example.values.len() >= 7, "expect at least 7 example values, found {}", example.values.len() );
	let model = M::model_load( &example.model ).expect( "examples load" );
	assert_record_close( &model.model_dump(), &example.model );
	let reloaded = M::model_load( &model.model_dump() ).expect( "dumps load" );
	assert_record_close( &reloaded.model_dump(), &model.model_dump() );

	// building from a sequence equals folding the adds
	let mut folded = M::Group::default();
	model.group_init( &mut folded );
	for value in &example.values {
	    model.group_add_value( &mut folded, value ).expect( "example values lie in the support" );
	}
	let created = model.group_create( example.values.iter().cloned() ).expect( "example values lie in the support" );
	assert_record_close( &model.group_dump( &folded ), &model.group_dump( &created ));

	// statistics survive the record round trip
	let dumped = model.group_dump( &created );
	let restored = model.group_load( &dumped ).expect( "dumps load" );
	assert_record_close( &model.group_dump( &restored ), &dumped );

	// removing every value returns to the empty state
	let mut emptied = created;
	for value in &example.values {
	    model.group_remove_value( &mut emptied, value ).expect( "removal of held values" );
	}
	let blank = model.group_create( Vec::new() ).expect( "empty groups build" );
	assert_record_close( &model.group_dump( &emptied ), &model.group_dump( &blank ));
	model.group_merge( &mut emptied, folded.clone() ).expect( "groups share the model" );
	assert_record_close( &model.group_dump( &emptied ), &model.group_dump( &folded ));

	// the scoring and sampling surface accepts its own output
	for value in &example.values {
	    model.score_value( &folded, value ).expect( "example values lie in the support" );
	}
	for _ in 0 .. 10 {
	    let value = model.sample_value( &folded );
	    model.score_value( &folded, &value ).expect( "sampled values lie in the support" );
	    assert_eq!( model.sample_group( 10 ).len(), 10 );
	}
	model.score_group( &folded );
	model.score_group( &blank );
    }
}

/// Checks the empty-group identity, the chain rule between sequential
/// predictive scores and the marginal likelihood, and that shuffled
/// removal and re-addition are exact inverses.
pub fn check_add_remove<M: Model>() {
    let _source = hold_sampling_lock();
    random::seed( 42 );
    for example in M::examples() {
	let model = M::model_load( &example.model ).expect( "examples load" );
	let mut group = model.group_create( Vec::new() ).expect( "empty groups build" );
	let empty_dump = model.group_dump( &group );
	assert_approx!( model.score_group( &group ), 0.0, 1e-12 );

	let mut score = 0.0;
	let mut values = Vec::new();
	for _ in 0 .. DATA_COUNT {
	    let value = model.sample_value( &group );
	    score += model.score_value( &group, &value ).expect( "sampled values lie in the support" );
	    model.group_add_value( &mut group, &value ).expect( "sampled values lie in the support" );
	    values.push( value );
	}
	let full_dump = model.group_dump( &group );
	assert_scores_close( score, model.score_group( &group ), "p(x1) p(x2|x1) ... != p(x1,...,xn)" );

	shuffle( &mut values );
	for value in &values {
	    model.group_remove_value( &mut group, value ).expect( "removal of held values" );
	}
	assert_record_close( &model.group_dump( &group ), &empty_dump );

	shuffle( &mut values );
	for value in &values {
	    model.group_add_value( &mut group, value ).expect( "sampled values lie in the support" );
	}
	assert_record_close( &model.group_dump( &group ), &full_dump );
    }
}

/// Merges every prefix/suffix split of the shuffled fixture values and
/// expects the whole-sequence group each time
pub fn check_add_merge<M: Model>() {
    let _source = hold_sampling_lock();
    random::seed( 43 );
    for example in M::examples() {
	let model = M::model_load( &example.model ).expect( "examples load" );
	let mut values = example.values.clone();
	shuffle( &mut values );
	let whole = model.group_create( values.iter().cloned() ).expect( "example values lie in the support" );
	let whole_dump = model.group_dump( &whole );

	for split in 0 ..= values.len() {
	    shuffle( &mut values );
	    let mut prefix = model.group_create( values[.. split].iter().cloned() ).expect( "example values lie in the support" );
	    let suffix = model.group_create( values[split ..].iter().cloned() ).expect( "example values lie in the support" );
	    model.group_merge( &mut prefix, suffix ).expect( "groups share the model" );
	    assert_record_close( &model.group_dump( &prefix ), &whole_dump );
	}
    }
}

/// Grows two shards and their union side by side and checks that merging
/// the shards always reproduces the union
pub fn check_group_merge<M: Model>() {
    let _source = hold_sampling_lock();
    random::seed( 44 );
    for example in M::examples() {
	let model = M::model_load( &example.model ).expect( "examples load" );
	let mut expected = model.group_create( Vec::new() ).expect( "empty groups build" );
	let mut left = expected.clone();
	let mut right = expected.clone();
	for _ in 0 .. 100 {
	    let value = model.sample_value( &expected );
	    model.group_add_value( &mut expected, &value ).expect( "sampled values lie in the support" );
	    model.group_add_value( &mut left, &value ).expect( "sampled values lie in the support" );

	    let value = model.sample_value( &expected );
	    model.group_add_value( &mut expected, &value ).expect( "sampled values lie in the support" );
	    model.group_add_value( &mut right, &value ).expect( "sampled values lie in the support" );

	    let mut actual = model.group_load( &model.group_dump( &left )).expect( "dumps load" );
	    model.group_merge( &mut actual, right.clone() ).expect( "groups share the model" );
	    assert_record_close( &model.group_dump( &actual ), &model.group_dump( &expected ));
	}
    }
}

/// Replays a fixed seed and expects bit-identical sample sequences
pub fn check_sample_seed<M: Model>() {
    let _source = hold_sampling_lock();
    for example in M::examples() {
	let model = M::model_load( &example.model ).expect( "examples load" );

	random::seed( 0 );
	let group = model.group_create( Vec::new() ).expect( "empty groups build" );
	let first: Vec<M::Value> = (0 .. DATA_COUNT).map( |_| model.sample_value( &group )).collect();

	random::seed( 0 );
	let group = model.group_create( Vec::new() ).expect( "empty groups build" );
	let second: Vec<M::Value> = (0 .. DATA_COUNT).map( |_| model.sample_value( &group )).collect();

	assert_eq!( first, second );
    }
}

/// Checks that scorer snapshots agree with live `score_value` calls, both
/// for the bare prior and for a populated group
pub fn check_scorer<M: Model>() {
    for example in M::examples() {
	let model = M::model_load( &example.model ).expect( "examples load" );
	let blank = model.group_create( Vec::new() ).expect( "empty groups build" );
	let prior_scorer = model.scorer_create( None );
	let blank_scorer = model.scorer_create( Some( &blank ));
	let populated = model.group_create( example.values.iter().cloned() ).expect( "example values lie in the support" );
	let populated_scorer = model.scorer_create( Some( &populated ));

	for value in &example.values {
	    let direct = model.score_value( &blank, value ).expect( "example values lie in the support" );
	    let prior = model.scorer_eval( &prior_scorer, value ).expect( "example values lie in the support" );
	    let snapshot = model.scorer_eval( &blank_scorer, value ).expect( "example values lie in the support" );
	    assert_scores_close( prior, direct, "prior scorer diverges from score_value" );
	    assert_scores_close( snapshot, direct, "empty group scorer diverges from score_value" );

	    let direct = model.score_value( &populated, value ).expect( "example values lie in the support" );
	    let snapshot = model.scorer_eval( &populated_scorer, value ).expect( "example values lie in the support" );
	    assert_scores_close( snapshot, direct, "populated scorer diverges from score_value" );
	}
    }
}

/// Accumulates value shards on worker threads and merges them into one
/// accumulator, as a partitioned inference driver would
pub fn check_shard_merge<M>() where
    M: Model + Sync,
    M::Value: Send + Sync,
    M::Group: Send,
{
    for example in M::examples() {
	let model = M::model_load( &example.model ).expect( "examples load" );
	let sequential = model.group_create( example.values.iter().cloned() ).expect( "example values lie in the support" );
	let shards: Vec<M::Group> = example.values.par_chunks( 3 )
	    .map( |shard| model.group_create( shard.iter().cloned() ).expect( "example values lie in the support" ))
	    .collect();
	let mut accumulator = model.group_create( Vec::new() ).expect( "empty groups build" );
	for shard in shards {
	    model.group_merge( &mut accumulator, shard ).expect( "groups share the model" );
	}
	assert_record_close( &model.group_dump( &accumulator ), &model.group_dump( &sequential ));
    }
}

/// Pearson chi-square fit of discrete samples against predictive
/// probabilities. Outcomes expected fewer than 5 times are pooled into one
/// tail bin. Returns the p-value of the fit.
pub fn discrete_goodness_of_fit<K, P>( samples: &[K], probability: P ) -> f64 where
    K: Eq + Hash + Clone,
    P: Fn(&K) -> f64,
{
    let mut counts: FxHashMap<K, usize> = FxHashMap::default();
    for sample in samples {
	*counts.entry( sample.clone() ).or_insert( 0 ) += 1;
    }
    let total = samples.len() as f64;

    let mut statistic = 0.0;
    let mut bins = 0;
    let mut tail_observed = 0.0;
    let mut tail_expected = total;
    for (value, observed) in &counts {
	let expected = probability( value ) * total;
	if expected >= 5.0 {
	    statistic += ( *observed as f64 - expected ).powi( 2 ) / expected;
	    bins += 1;
	    tail_expected -= expected;
	} else {
	    tail_observed += *observed as f64;
	}
    }
    if tail_expected > 0.5 {
	statistic += ( tail_observed - tail_expected ).powi( 2 ) / tail_expected;
	bins += 1;
    }
    if bins < 2 {
	// a single bin holds all the mass and cannot reject
	return 1.0;
    }
    let reference = ChiSquared::new(( bins - 1 ) as f64 ).expect( "at least one degree of freedom" );
    1.0 - reference.cdf( statistic )
}

/// Kolmogorov-Smirnov fit of continuous samples against a predictive
/// distribution function. Sorts the samples in place. Returns the p-value
/// of the fit.
pub fn density_goodness_of_fit<F>( samples: &mut [f64], distribution: F ) -> f64 where
    F: Fn(f64) -> f64,
{
    samples.sort_unstable_by( |left, right| left.total_cmp( right ));
    let total = samples.len() as f64;
    let mut statistic: f64 = 0.0;
    for (index, sample) in samples.iter().enumerate() {
	let level = distribution( *sample );
	let lower = index as f64 / total;
	let upper = ( index + 1 ) as f64 / total;
	statistic = statistic.max(( level - lower ).abs() ).max(( upper - level ).abs() );
    }
    kolmogorov_survival( total.sqrt() * statistic )
}

/// Asymptotic tail of the Kolmogorov distribution
fn kolmogorov_survival( statistic: f64 ) -> f64 {
    if statistic <= 0.0 {
	return 1.0;
    }
    let mut survival = 0.0;
    for term in 1 .. 101 {
	let sign = if term % 2 == 1 { 2.0 } else { -2.0 };
	survival += sign * f64::exp( -2.0 * (( term * term ) as f64) * statistic * statistic );
    }
    survival.clamp( 0.0, 1.0 )
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_closeness_tolerates_rounding() {
	let left = json!( { "count": 3, "mean": 0.30000000001, "tags": ["a"] } );
	let right = json!( { "count": 3, "mean": 0.3, "tags": ["a"] } );
	assert_record_close( &left, &right );
    }

    #[test]
    #[should_panic]
    fn record_closeness_spots_diverging_numbers() {
	assert_record_close( &json!( { "mean": 0.31 } ), &json!( { "mean": 0.3 } ));
    }

    #[test]
    #[should_panic]
    fn record_closeness_spots_diverging_fields() {
	assert_record_close( &json!( { "heads": 1 } ), &json!( { "tails": 1 } ));
    }

    #[test]
    fn chi_square_accepts_matching_counts() {
	// a fair four-sided die observed exactly at expectation
	let mut samples = Vec::new();
	for outcome in 0 .. 4 {
	    samples.extend( std::iter::repeat( outcome ).take( 250 ));
	}
	let fit = discrete_goodness_of_fit( &samples, |_| 0.25 );
	assert!( fit > 0.99, "fit {fit}" );
    }

    #[test]
    fn chi_square_rejects_skewed_counts() {
	let mut samples = vec!( 0; 900 );
	samples.extend( vec!( 1; 100 ));
	let fit = discrete_goodness_of_fit( &samples, |_| 0.5 );
	assert!( fit < MIN_GOODNESS_OF_FIT, "fit {fit}" );
    }

    #[test]
    fn kolmogorov_accepts_uniform_grid() {
	let mut samples: Vec<f64> = (0 .. 1000).map( |index| ( index as f64 + 0.5 ) / 1000.0 ).collect();
	let fit = density_goodness_of_fit( &mut samples, |value| value );
	assert!( fit > 0.99, "fit {fit}" );
    }

    #[test]
    fn kolmogorov_rejects_shifted_grid() {
	let mut samples: Vec<f64> = (0 .. 1000).map( |index| ( index as f64 + 0.5 ) / 2000.0 ).collect();
	let fit = density_goodness_of_fit( &mut samples, |value| value );
	assert!( fit < MIN_GOODNESS_OF_FIT, "fit {fit}" );
    }
}
