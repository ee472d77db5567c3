
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Gamma;
use statrs::function::gamma::ln_gamma;

use crate::error::{ModelError, Result};
use crate::random;

use super::{Example, Model};

/// Dirichlet prior over the weights of a discrete observation model with a
/// fixed finite support `0 .. alphas.len()`
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct DirichletDiscrete {
    alphas: Vec<f64>,
}

/// Occurrence counts per supported outcome
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
pub struct DirichletDiscreteGroup {
    counts: Vec<u64>,
}

/// Snapshot of the predictive log probability of every outcome
#[derive( Debug, Clone )]
pub struct DirichletDiscreteScorer {
    log_probs: Vec<f64>,
}

impl Model for DirichletDiscrete {
    type Value = usize;
    type Group = DirichletDiscreteGroup;
    type Scorer = DirichletDiscreteScorer;

    const FAMILY: &'static str = "dirichlet_discrete";

    fn validate( &self ) -> Result<()> {
	if self.alphas.len() < 2 {
	    return Err( ModelError::validation( Self::FAMILY, format!( "support needs at least 2 outcomes, got {}", self.alphas.len() )));
	}
	for alpha in &self.alphas {
	    if !( *alpha > 0.0 ) || !alpha.is_finite() {
		return Err( ModelError::validation( Self::FAMILY, format!( "concentrations must be positive, got {alpha}" )));
	    }
	}
	Ok( () )
    }

    fn examples() -> Vec<Example<Self>> {
	vec!(
	    Example {
		model: serde_json::json!( { "alphas": [1.0, 1.0, 1.0, 1.0] } ),
		values: vec!( 0, 1, 1, 2, 3, 0, 1, 2, 1 ),
	    },
	    Example {
		model: serde_json::json!( { "alphas": [0.5, 0.5] } ),
		values: vec!( 0, 1, 0, 0, 1, 1, 0, 1, 0 ),
	    },
	)
    }

    fn group_init( &self, group: &mut DirichletDiscreteGroup ) {
	group.counts.clear();
	group.counts.resize( self.alphas.len(), 0 );
    }

    fn group_check( &self, group: &DirichletDiscreteGroup ) -> Result<()> {
	if group.counts.len() != self.alphas.len() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "expect {} outcome counts, got {}", self.alphas.len(), group.counts.len() )));
	}
	Ok( () )
    }

    fn group_add_value( &self, group: &mut DirichletDiscreteGroup, value: &usize ) -> Result<()> {
	self.check_support( *value )?;
	group.counts[ *value ] += 1;
	Ok( () )
    }

    fn group_remove_value( &self, group: &mut DirichletDiscreteGroup, value: &usize ) -> Result<()> {
	self.check_support( *value )?;
	if group.counts[ *value ] == 0 {
	    return Err( ModelError::precondition( Self::FAMILY, format!( "cannot remove {value} from statistics {group:?}" )));
	}
	group.counts[ *value ] -= 1;
	Ok( () )
    }

    fn group_merge( &self, destination: &mut DirichletDiscreteGroup, source: DirichletDiscreteGroup ) -> Result<()> {
	if destination.counts.len() != source.counts.len() {
	    return Err( ModelError::precondition( Self::FAMILY, format!( "cannot merge {} outcome counts into {}", source.counts.len(), destination.counts.len() )));
	}
	for (accumulator, count) in destination.counts.iter_mut().zip( source.counts ) {
	    *accumulator += count;
	}
	Ok( () )
    }

    fn score_group( &self, group: &DirichletDiscreteGroup ) -> f64 {
	debug_assert_eq!( self.alphas.len(), group.counts.len() );
	let alpha_sum: f64 = self.alphas.iter().sum();
	let total: u64 = group.counts.iter().sum();
	let outcome_part: f64 = self.alphas.iter().zip( &group.counts )
	    .map( |(alpha, count)| ln_gamma( alpha + *count as f64 ) - ln_gamma( *alpha ))
	    .sum();
	outcome_part + ln_gamma( alpha_sum ) - ln_gamma( alpha_sum + total as f64 )
    }

    /// Consumes one Gamma variate per outcome plus one weighted draw
    fn sample_value( &self, group: &DirichletDiscreteGroup ) -> usize {
	let mut generator = random::lock();
	let weights: Vec<f64> = self.alphas.iter().zip( &group.counts )
	    .map( |(alpha, count)| {
		let shape = Gamma::new( alpha + *count as f64, 1.0 ).expect( "posterior parameters stay positive" );
		shape.sample( &mut *generator )
	    }).collect();
	let outcome = WeightedIndex::new( &weights ).expect( "gamma draws are positive" );
	outcome.sample( &mut *generator )
    }

    fn scorer_create( &self, group: Option<&DirichletDiscreteGroup> ) -> DirichletDiscreteScorer {
	let counts = group.map( |g| g.counts.as_slice() ).unwrap_or( &[] );
	let total: u64 = counts.iter().sum();
	let alpha_sum: f64 = self.alphas.iter().sum();
	let normalizer = ( alpha_sum + total as f64 ).ln();
	let log_probs = self.alphas.iter().enumerate()
	    .map( |(outcome, alpha)| {
		let count = counts.get( outcome ).copied().unwrap_or( 0 );
		( alpha + count as f64 ).ln() - normalizer
	    }).collect();
	DirichletDiscreteScorer { log_probs }
    }

    fn scorer_eval( &self, scorer: &DirichletDiscreteScorer, value: &usize ) -> Result<f64> {
	self.check_support( *value )?;
	Ok( scorer.log_probs[ *value ] )
    }
}

impl DirichletDiscrete {
    fn check_support( &self, value: usize ) -> Result<()> {
	if value >= self.alphas.len() {
	    return Err( ModelError::domain( Self::FAMILY, format!( "outcome {value} exceeds the support 0..{}", self.alphas.len() )));
	}
	Ok( () )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_approx;
    use crate::conformance::*;
    use crate::random;

    fn example_model() -> DirichletDiscrete {
	DirichletDiscrete { alphas: vec!( 1.0, 1.0, 1.0, 1.0 ) }
    }

    #[test]
    fn predictive_follows_posterior_counts() {
	let model = example_model();
	let group = model.group_create( vec!( 0, 1, 1, 2 )).unwrap();
	let calculated = model.score_value( &group, &1 ).unwrap();
	assert_approx!( calculated, f64::ln( 3.0 / 8.0 ), 1e-9 );
	let calculated = model.score_value( &group, &3 ).unwrap();
	assert_approx!( calculated, f64::ln( 1.0 / 8.0 ), 1e-9 );
    }

    #[test]
    fn marginal_likelihood_integrates_the_weights() {
	let model = example_model();
	let group = model.group_create( vec!( 0, 1, 1, 2 )).unwrap();
	// Gamma( 4 ) / Gamma( 8 ) times Gamma( 2 ) Gamma( 3 ) Gamma( 2 )
	assert_approx!( model.score_group( &group ), f64::ln( 1.0 / 420.0 ), 1e-9 );
    }

    #[test]
    fn rejects_outcomes_beyond_the_support() {
	let model = example_model();
	let mut group = model.group_create( Vec::new() ).unwrap();
	let report = model.group_add_value( &mut group, &4 );
	assert!( matches!( report, Err( crate::ModelError::Domain { .. } )));
    }

    #[test]
    fn rejects_mismatched_statistics_records() {
	let model = example_model();
	let record = serde_json::json!( { "counts": [0, 0] } );
	assert!( matches!( model.group_load( &record ), Err( crate::ModelError::Validation { .. } )));
    }

    #[test]
    fn conforms_to_group_algebra() {
	check_interface::<DirichletDiscrete>();
	check_add_remove::<DirichletDiscrete>();
	check_add_merge::<DirichletDiscrete>();
	check_group_merge::<DirichletDiscrete>();
	check_shard_merge::<DirichletDiscrete>();
    }

    #[test]
    fn conforms_to_sampling_contract() {
	check_sample_seed::<DirichletDiscrete>();
	check_scorer::<DirichletDiscrete>();
    }

    #[test]
    fn sampler_matches_predictive_scores() {
	let _source = hold_sampling_lock();
	random::seed( 7 );
	let model = example_model();
	for values in [vec!(), vec!( 0, 1, 1, 2, 3, 0, 1, 2, 1 )] {
	    let group = model.group_create( values ).unwrap();
	    let samples: Vec<usize> = (0 .. SAMPLE_COUNT).map( |_| model.sample_value( &group )).collect();
	    let fit = discrete_goodness_of_fit( &samples, |value| {
		model.score_value( &group, value ).unwrap().exp()
	    });
	    assert!( fit > MIN_GOODNESS_OF_FIT, "goodness of fit {fit}" );
	}
    }
}
