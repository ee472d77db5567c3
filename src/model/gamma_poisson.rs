
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Gamma, Poisson};
use statrs::function::factorial::ln_factorial;
use statrs::function::gamma::ln_gamma;

use crate::error::{ModelError, Result};
use crate::random;

use super::{Example, Model};

/// Gamma prior over the rate of a Poisson observation model.
///
/// The rate prior is Gamma( alpha, inv_beta ) parameterized by shape and
/// rate, so the posterior after observing a group is
/// Gamma( alpha + sum, inv_beta + count ) and the posterior predictive is
/// negative binomial.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct GammaPoisson {
    alpha: f64,
    inv_beta: f64,
}

/// Sufficient statistics of a Poisson count multiset
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
pub struct GammaPoissonGroup {
    count: u64,
    sum: u64,
    /// sum of ln( value! ), carried so the marginal likelihood stays O(1)
    log_prod: f64,
}

/// Posterior predictive snapshot in the negative binomial form
#[derive( Debug, Clone )]
pub struct GammaPoissonScorer {
    score: f64,
    post_alpha: f64,
    score_coeff: f64,
}

impl Model for GammaPoisson {
    type Value = u32;
    type Group = GammaPoissonGroup;
    type Scorer = GammaPoissonScorer;

    const FAMILY: &'static str = "gamma_poisson";

    fn validate( &self ) -> Result<()> {
	if !( self.alpha > 0.0 ) || !self.alpha.is_finite() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "alpha must be positive, got {}", self.alpha )));
	}
	if !( self.inv_beta > 0.0 ) || !self.inv_beta.is_finite() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "inv_beta must be positive, got {}", self.inv_beta )));
	}
	Ok( () )
    }

    fn examples() -> Vec<Example<Self>> {
	vec!(
	    Example {
		model: serde_json::json!( { "alpha": 1.0, "inv_beta": 1.0 } ),
		values: vec!( 0, 1, 1, 2, 2, 5, 1, 0, 3, 1 ),
	    },
	    Example {
		model: serde_json::json!( { "alpha": 4.5, "inv_beta": 0.5 } ),
		values: vec!( 7, 2, 12, 4, 5, 9, 3, 8 ),
	    },
	)
    }

    fn group_init( &self, group: &mut GammaPoissonGroup ) {
	group.count = 0;
	group.sum = 0;
	group.log_prod = 0.0;
    }

    fn group_check( &self, group: &GammaPoissonGroup ) -> Result<()> {
	if !group.log_prod.is_finite() || group.log_prod < 0.0 {
	    return Err( ModelError::validation( Self::FAMILY, format!( "log_prod must be a non-negative real, got {}", group.log_prod )));
	}
	Ok( () )
    }

    fn group_add_value( &self, group: &mut GammaPoissonGroup, value: &u32 ) -> Result<()> {
	group.count += 1;
	group.sum += *value as u64;
	group.log_prod += ln_factorial( *value as u64 );
	Ok( () )
    }

    fn group_remove_value( &self, group: &mut GammaPoissonGroup, value: &u32 ) -> Result<()> {
	if group.count == 0 || group.sum < *value as u64 {
	    return Err( ModelError::precondition( Self::FAMILY, format!( "cannot remove {value} from statistics {group:?}" )));
	}
	if group.count == 1 && group.sum != *value as u64 {
	    return Err( ModelError::precondition( Self::FAMILY, format!( "{value} is not the last value held by {group:?}" )));
	}
	group.count -= 1;
	group.sum -= *value as u64;
	group.log_prod -= ln_factorial( *value as u64 );
	if group.count == 0 {
	    // the empty state is exact again after the last removal
	    group.log_prod = 0.0;
	}
	Ok( () )
    }

    fn group_merge( &self, destination: &mut GammaPoissonGroup, source: GammaPoissonGroup ) -> Result<()> {
	destination.count += source.count;
	destination.sum += source.sum;
	destination.log_prod += source.log_prod;
	Ok( () )
    }

    fn score_group( &self, group: &GammaPoissonGroup ) -> f64 {
	let post = self.posterior( group );
	let mut score = ln_gamma( post.alpha ) - ln_gamma( self.alpha );
	score += self.alpha * self.inv_beta.ln() - post.alpha * post.inv_beta.ln();
	score - group.log_prod
    }

    /// Consumes two variates per call: a Gamma rate and a Poisson count
    fn sample_value( &self, group: &GammaPoissonGroup ) -> u32 {
	let post = self.posterior( group );
	let rate_prior = Gamma::new( post.alpha, post.inv_beta ).expect( "posterior parameters stay positive" );
	let mut generator = random::lock();
	let rate = rate_prior.sample( &mut *generator );
	let observation = Poisson::new( rate ).expect( "gamma draws are positive" );
	observation.sample( &mut *generator ) as u32
    }

    fn scorer_create( &self, group: Option<&GammaPoissonGroup> ) -> GammaPoissonScorer {
	let empty = GammaPoissonGroup::default();
	let post = self.posterior( group.unwrap_or( &empty ));
	let score_coeff = -( 1.0 + post.inv_beta ).ln();
	GammaPoissonScorer {
	    score: -ln_gamma( post.alpha ) + post.alpha * ( post.inv_beta.ln() + score_coeff ),
	    post_alpha: post.alpha,
	    score_coeff,
	}
    }

    fn scorer_eval( &self, scorer: &GammaPoissonScorer, value: &u32 ) -> Result<f64> {
	Ok( scorer.score
	    + ln_gamma( scorer.post_alpha + *value as f64 )
	    - ln_factorial( *value as u64 )
	    + scorer.score_coeff * *value as f64 )
    }
}

impl GammaPoisson {
    /// Conjugate update of the rate prior by a group's statistics
    fn posterior( &self, group: &GammaPoissonGroup ) -> GammaPoisson {
	GammaPoisson {
	    alpha: self.alpha + group.sum as f64,
	    inv_beta: self.inv_beta + group.count as f64,
	}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_approx;
    use crate::conformance::*;
    use crate::random;

    fn example_model() -> GammaPoisson {
	GammaPoisson { alpha: 1.0, inv_beta: 1.0 }
    }

    #[test]
    fn predictive_is_negative_binomial() {
	let model = example_model();
	let group = model.group_create( vec!( 2, 0, 1 )).unwrap();
	// posterior is Gamma( 4, 4 ), so p( 1 ) = 4 * (4/5)^4 * (1/5)
	let calculated = model.score_value( &group, &1 ).unwrap();
	assert_approx!( calculated, f64::ln( 0.32768 ), 1e-9 );
    }

    #[test]
    fn marginal_likelihood_of_single_count() {
	let model = example_model();
	let group = model.group_create( vec!( 0 )).unwrap();
	// p( 0 ) under the prior predictive Geometric( 1/2 )
	assert_approx!( model.score_group( &group ), f64::ln( 0.5 ), 1e-9 );
	let group = model.group_create( vec!( 3 )).unwrap();
	assert_approx!( model.score_group( &group ), f64::ln( 1.0 / 16.0 ), 1e-9 );
    }

    #[test]
    fn removal_detects_underflow() {
	let model = example_model();
	let mut group = model.group_create( vec!( 1 )).unwrap();
	let report = model.group_remove_value( &mut group, &2 );
	assert!( matches!( report, Err( crate::ModelError::Precondition { .. } )));
    }

    #[test]
    fn rejects_non_positive_shape() {
	let record = serde_json::json!( { "alpha": -1.0, "inv_beta": 1.0 } );
	assert!( matches!( GammaPoisson::model_load( &record ), Err( crate::ModelError::Validation { .. } )));
    }

    #[test]
    fn conforms_to_group_algebra() {
	check_interface::<GammaPoisson>();
	check_add_remove::<GammaPoisson>();
	check_add_merge::<GammaPoisson>();
	check_group_merge::<GammaPoisson>();
	check_shard_merge::<GammaPoisson>();
    }

    #[test]
    fn conforms_to_sampling_contract() {
	check_sample_seed::<GammaPoisson>();
	check_scorer::<GammaPoisson>();
    }

    #[test]
    fn sampler_matches_predictive_scores() {
	let _source = hold_sampling_lock();
	random::seed( 7 );
	let model = example_model();
	for values in [vec!(), vec!( 0, 1, 1, 2, 2, 5, 1, 0, 3, 1 )] {
	    let group = model.group_create( values ).unwrap();
	    let samples: Vec<u32> = (0 .. SAMPLE_COUNT).map( |_| model.sample_value( &group )).collect();
	    let fit = discrete_goodness_of_fit( &samples, |value| {
		model.score_value( &group, value ).unwrap().exp()
	    });
	    assert!( fit > MIN_GOODNESS_OF_FIT, "goodness of fit {fit}" );
	}
    }
}
