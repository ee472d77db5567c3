
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Beta;
use statrs::function::beta::ln_beta;

use crate::error::{ModelError, Result};
use crate::random;

use super::{Example, Model};

/// Beta prior over the success probability of a Bernoulli observation model
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct BetaBernoulli {
    alpha: f64,
    beta: f64,
}

/// Sufficient statistics of a boolean multiset
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
pub struct BetaBernoulliGroup {
    heads: u64,
    tails: u64,
}

/// Snapshot of the two predictive log probabilities
#[derive( Debug, Clone )]
pub struct BetaBernoulliScorer {
    log_heads: f64,
    log_tails: f64,
}

impl Model for BetaBernoulli {
    type Value = bool;
    type Group = BetaBernoulliGroup;
    type Scorer = BetaBernoulliScorer;

    const FAMILY: &'static str = "beta_bernoulli";

    fn validate( &self ) -> Result<()> {
	if !( self.alpha > 0.0 ) || !self.alpha.is_finite() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "alpha must be positive, got {}", self.alpha )));
	}
	if !( self.beta > 0.0 ) || !self.beta.is_finite() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "beta must be positive, got {}", self.beta )));
	}
	Ok( () )
    }

    fn examples() -> Vec<Example<Self>> {
	vec!(
	    Example {
		model: serde_json::json!( { "alpha": 0.5, "beta": 2.0 } ),
		values: vec!( false, false, true, false, true, true, false, false, false, false ),
	    },
	    Example {
		model: serde_json::json!( { "alpha": 10.0, "beta": 10.0 } ),
		values: vec!( true, false, true, true, false, true, false, true ),
	    },
	)
    }

    fn group_init( &self, group: &mut BetaBernoulliGroup ) {
	group.heads = 0;
	group.tails = 0;
    }

    fn group_add_value( &self, group: &mut BetaBernoulliGroup, value: &bool ) -> Result<()> {
	if *value {
	    group.heads += 1;
	} else {
	    group.tails += 1;
	}
	Ok( () )
    }

    fn group_remove_value( &self, group: &mut BetaBernoulliGroup, value: &bool ) -> Result<()> {
	let counter = if *value { &mut group.heads } else { &mut group.tails };
	if *counter == 0 {
	    return Err( ModelError::precondition( Self::FAMILY, format!( "cannot remove {value} from statistics {group:?}" )));
	}
	*counter -= 1;
	Ok( () )
    }

    fn group_merge( &self, destination: &mut BetaBernoulliGroup, source: BetaBernoulliGroup ) -> Result<()> {
	destination.heads += source.heads;
	destination.tails += source.tails;
	Ok( () )
    }

    fn score_group( &self, group: &BetaBernoulliGroup ) -> f64 {
	let post = self.posterior( group );
	ln_beta( post.alpha, post.beta ) - ln_beta( self.alpha, self.beta )
    }

    /// Consumes two variates per call: a Beta weight and a Bernoulli outcome
    fn sample_value( &self, group: &BetaBernoulliGroup ) -> bool {
	let post = self.posterior( group );
	let weight_prior = Beta::new( post.alpha, post.beta ).expect( "posterior parameters stay positive" );
	let mut generator = random::lock();
	let weight = weight_prior.sample( &mut *generator );
	generator.gen_bool( weight )
    }

    fn scorer_create( &self, group: Option<&BetaBernoulliGroup> ) -> BetaBernoulliScorer {
	let empty = BetaBernoulliGroup::default();
	let post = self.posterior( group.unwrap_or( &empty ));
	let total = post.alpha + post.beta;
	BetaBernoulliScorer {
	    log_heads: ( post.alpha / total ).ln(),
	    log_tails: ( post.beta / total ).ln(),
	}
    }

    fn scorer_eval( &self, scorer: &BetaBernoulliScorer, value: &bool ) -> Result<f64> {
	Ok( if *value { scorer.log_heads } else { scorer.log_tails } )
    }
}

impl BetaBernoulli {
    /// Conjugate update of the weight prior by a group's statistics
    fn posterior( &self, group: &BetaBernoulliGroup ) -> BetaBernoulli {
	BetaBernoulli {
	    alpha: self.alpha + group.heads as f64,
	    beta: self.beta + group.tails as f64,
	}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_approx;
    use crate::conformance::*;
    use crate::random;

    #[test]
    fn predictive_follows_posterior_counts() {
	let model = BetaBernoulli { alpha: 1.0, beta: 1.0 };
	let group = model.group_create( vec!( true, true, true, false, false )).unwrap();
	let calculated = model.score_value( &group, &true ).unwrap();
	assert_approx!( calculated, f64::ln( 4.0 / 7.0 ), 1e-9 );
	let calculated = model.score_value( &group, &false ).unwrap();
	assert_approx!( calculated, f64::ln( 3.0 / 7.0 ), 1e-9 );
    }

    #[test]
    fn marginal_likelihood_uses_beta_function() {
	let model = BetaBernoulli { alpha: 1.0, beta: 1.0 };
	let group = model.group_create( vec!( true, true, true, false, false )).unwrap();
	// B( 4, 3 ) / B( 1, 1 ) = 3! 2! / 6!
	assert_approx!( model.score_group( &group ), f64::ln( 1.0 / 60.0 ), 1e-9 );
    }

    #[test]
    fn removal_detects_missing_value() {
	let model = BetaBernoulli { alpha: 1.0, beta: 1.0 };
	let mut group = model.group_create( vec!( true )).unwrap();
	let report = model.group_remove_value( &mut group, &false );
	assert!( matches!( report, Err( crate::ModelError::Precondition { .. } )));
    }

    #[test]
    fn conforms_to_group_algebra() {
	check_interface::<BetaBernoulli>();
	check_add_remove::<BetaBernoulli>();
	check_add_merge::<BetaBernoulli>();
	check_group_merge::<BetaBernoulli>();
	check_shard_merge::<BetaBernoulli>();
    }

    #[test]
    fn conforms_to_sampling_contract() {
	check_sample_seed::<BetaBernoulli>();
	check_scorer::<BetaBernoulli>();
    }

    #[test]
    fn sampler_matches_predictive_scores() {
	let _source = hold_sampling_lock();
	random::seed( 7 );
	let model = BetaBernoulli { alpha: 0.5, beta: 2.0 };
	for values in [vec!(), vec!( false, false, true, false, true, true, false, false, false, false )] {
	    let group = model.group_create( values ).unwrap();
	    let samples: Vec<bool> = (0 .. SAMPLE_COUNT).map( |_| model.sample_value( &group )).collect();
	    let fit = discrete_goodness_of_fit( &samples, |value| {
		model.score_value( &group, value ).unwrap().exp()
	    });
	    assert!( fit > MIN_GOODNESS_OF_FIT, "goodness of fit {fit}" );
	}
    }
}
