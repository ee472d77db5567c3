
use std::f64::consts::PI;

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, Continuous, Normal, StudentsT};

use crate::error::{ModelError, Result};
use crate::random;

use super::{Example, Model};

/// Normal-scaled-inverse-chi-square prior over the mean and variance of a
/// Normal observation model, after Murphy (2007), eqs. 141-144.
///
/// `mu` and `kappa` locate the mean prior, `sigmasq` and `nu` the variance
/// prior. The posterior predictive is a location-scale Student-t.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct NormalInvChiSq {
    mu: f64,
    kappa: f64,
    sigmasq: f64,
    nu: f64,
}

/// Sufficient statistics of a real-valued multiset, held as the running
/// mean and the sum of squared deviations so single values can be removed
/// exactly
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
pub struct NormalInvChiSqGroup {
    count: u64,
    mean: f64,
    count_times_variance: f64,
}

/// Posterior predictive snapshot, a frozen Student-t
#[derive( Debug, Clone )]
pub struct NormalInvChiSqScorer {
    predictive: StudentsT,
}

impl Model for NormalInvChiSq {
    type Value = f64;
    type Group = NormalInvChiSqGroup;
    type Scorer = NormalInvChiSqScorer;

    const FAMILY: &'static str = "normal_inv_chisq";

    fn validate( &self ) -> Result<()> {
	if !self.mu.is_finite() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "mu must be a real, got {}", self.mu )));
	}
	for (name, parameter) in [("kappa", self.kappa), ("sigmasq", self.sigmasq), ("nu", self.nu)] {
	    if !( parameter > 0.0 ) || !parameter.is_finite() {
		return Err( ModelError::validation( Self::FAMILY, format!( "{name} must be positive, got {parameter}" )));
	    }
	}
	Ok( () )
    }

    fn examples() -> Vec<Example<Self>> {
	vec!(
	    Example {
		model: serde_json::json!( { "mu": 0.0, "kappa": 1.0, "sigmasq": 1.0, "nu": 1.0 } ),
		values: vec!( -4.0, -2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0, 4.0 ),
	    },
	    Example {
		model: serde_json::json!( { "mu": 2.3, "kappa": 2.0, "sigmasq": 3.0, "nu": 5.0 } ),
		values: vec!( 3.1, 1.4, 0.8, 4.4, 2.6, 2.2, 5.0, 1.9 ),
	    },
	)
    }

    fn group_init( &self, group: &mut NormalInvChiSqGroup ) {
	group.count = 0;
	group.mean = 0.0;
	group.count_times_variance = 0.0;
    }

    fn group_check( &self, group: &NormalInvChiSqGroup ) -> Result<()> {
	if !group.mean.is_finite() {
	    return Err( ModelError::validation( Self::FAMILY, format!( "mean must be a real, got {}", group.mean )));
	}
	if !group.count_times_variance.is_finite() || group.count_times_variance < 0.0 {
	    return Err( ModelError::validation( Self::FAMILY, format!( "count_times_variance must be a non-negative real, got {}", group.count_times_variance )));
	}
	Ok( () )
    }

    fn group_add_value( &self, group: &mut NormalInvChiSqGroup, value: &f64 ) -> Result<()> {
	self.check_support( *value )?;
	group.count += 1;
	let delta = value - group.mean;
	group.mean += delta / group.count as f64;
	group.count_times_variance += delta * ( value - group.mean );
	Ok( () )
    }

    fn group_remove_value( &self, group: &mut NormalInvChiSqGroup, value: &f64 ) -> Result<()> {
	self.check_support( *value )?;
	if group.count == 0 {
	    return Err( ModelError::precondition( Self::FAMILY, format!( "cannot remove {value} from empty statistics" )));
	}
	let total = group.mean * group.count as f64;
	let delta = value - group.mean;
	group.count -= 1;
	if group.count == 0 {
	    group.mean = 0.0;
	} else {
	    group.mean = ( total - value ) / group.count as f64;
	}
	if group.count <= 1 {
	    // one remaining value has no spread; this also restores the
	    // empty state exactly
	    group.count_times_variance = 0.0;
	} else {
	    group.count_times_variance -= delta * ( value - group.mean );
	}
	Ok( () )
    }

    fn group_merge( &self, destination: &mut NormalInvChiSqGroup, source: NormalInvChiSqGroup ) -> Result<()> {
	if source.count == 0 {
	    return Ok( () );
	}
	let count = destination.count + source.count;
	let delta = source.mean - destination.mean;
	let source_part = source.count as f64 / count as f64;
	let cross_part = destination.count as f64 * source_part;
	destination.count = count;
	destination.mean += source_part * delta;
	destination.count_times_variance += source.count_times_variance + cross_part * delta * delta;
	Ok( () )
    }

    fn score_group( &self, group: &NormalInvChiSqGroup ) -> f64 {
	let post = self.posterior( group );
	let mut score = ln_gamma_half( post.nu ) - ln_gamma_half( self.nu );
	score += 0.5 * ( self.kappa / post.kappa ).ln();
	score += 0.5 * self.nu * ( self.nu * self.sigmasq ).ln();
	score -= 0.5 * post.nu * ( post.nu * post.sigmasq ).ln();
	score - group.count as f64 / 2.0 * PI.ln()
    }

    /// Consumes three variates per call: a chi-square draw for the
    /// variance, then two Normal draws for the mean and the observation
    fn sample_value( &self, group: &NormalInvChiSqGroup ) -> f64 {
	let post = self.posterior( group );
	let freedom = ChiSquared::new( post.nu ).expect( "posterior parameters stay positive" );
	let mut generator = random::lock();
	let sigmasq = post.nu * post.sigmasq / freedom.sample( &mut *generator );
	let mean_prior = Normal::new( post.mu, ( sigmasq / post.kappa ).sqrt() ).expect( "scaled draws are positive" );
	let mean = mean_prior.sample( &mut *generator );
	let observation = Normal::new( mean, sigmasq.sqrt() ).expect( "scaled draws are positive" );
	observation.sample( &mut *generator )
    }

    fn scorer_create( &self, group: Option<&NormalInvChiSqGroup> ) -> NormalInvChiSqScorer {
	let empty = NormalInvChiSqGroup::default();
	let post = self.posterior( group.unwrap_or( &empty ));
	let scale = (( 1.0 + post.kappa ) * post.sigmasq / post.kappa ).sqrt();
	NormalInvChiSqScorer {
	    predictive: StudentsT::new( post.mu, scale, post.nu ).expect( "posterior parameters stay positive" ),
	}
    }

    fn scorer_eval( &self, scorer: &NormalInvChiSqScorer, value: &f64 ) -> Result<f64> {
	self.check_support( *value )?;
	Ok( scorer.predictive.ln_pdf( *value ))
    }
}

impl NormalInvChiSq {
    /// Conjugate update of the mean and variance prior by a group's
    /// statistics
    fn posterior( &self, group: &NormalInvChiSqGroup ) -> NormalInvChiSq {
	let count = group.count as f64;
	let kappa = self.kappa + count;
	let nu = self.nu + count;
	let spread = self.nu * self.sigmasq
	    + group.count_times_variance
	    + count * self.kappa * ( self.mu - group.mean ).powi( 2 ) / kappa;
	NormalInvChiSq {
	    mu: ( self.kappa * self.mu + count * group.mean ) / kappa,
	    kappa,
	    sigmasq: spread / nu,
	    nu,
	}
    }

    fn check_support( &self, value: f64 ) -> Result<()> {
	if !value.is_finite() {
	    return Err( ModelError::domain( Self::FAMILY, format!( "observations must be reals, got {value}" )));
	}
	Ok( () )
    }
}

fn ln_gamma_half( nu: f64 ) -> f64 {
    statrs::function::gamma::ln_gamma( nu / 2.0 )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_approx;
    use crate::conformance::*;
    use crate::random;

    fn example_model() -> NormalInvChiSq {
	NormalInvChiSq { mu: 0.0, kappa: 1.0, sigmasq: 1.0, nu: 1.0 }
    }

    #[test]
    fn statistics_follow_welford_updates() {
	let model = example_model();
	let group = model.group_create( vec!( 1.0, 2.0, 3.0 )).unwrap();
	assert_eq!( group.count, 3 );
	assert_approx!( group.mean, 2.0, 1e-12 );
	assert_approx!( group.count_times_variance, 2.0, 1e-12 );
    }

    #[test]
    fn prior_predictive_is_student_t() {
	let model = example_model();
	let group = model.group_create( Vec::new() ).unwrap();
	// t with one degree of freedom and scale sqrt( 2 ), evaluated at 0
	let expected = f64::ln( 1.0 / ( PI * f64::sqrt( 2.0 )));
	assert_approx!( model.score_value( &group, &0.0 ).unwrap(), expected, 1e-9 );
    }

    #[test]
    fn rejects_values_outside_the_reals() {
	let model = example_model();
	let mut group = model.group_create( Vec::new() ).unwrap();
	let report = model.group_add_value( &mut group, &f64::NAN );
	assert!( matches!( report, Err( crate::ModelError::Domain { .. } )));
	let report = model.score_value( &group, &f64::INFINITY );
	assert!( matches!( report, Err( crate::ModelError::Domain { .. } )));
    }

    #[test]
    fn conforms_to_group_algebra() {
	check_interface::<NormalInvChiSq>();
	check_add_remove::<NormalInvChiSq>();
	check_add_merge::<NormalInvChiSq>();
	check_group_merge::<NormalInvChiSq>();
	check_shard_merge::<NormalInvChiSq>();
    }

    #[test]
    fn conforms_to_sampling_contract() {
	check_sample_seed::<NormalInvChiSq>();
	check_scorer::<NormalInvChiSq>();
    }

    #[test]
    fn sampler_matches_predictive_density() {
	let _source = hold_sampling_lock();
	random::seed( 7 );
	let model = example_model();
	for values in [vec!(), vec!( -4.0, -2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0, 4.0 )] {
	    let group = model.group_create( values ).unwrap();
	    let scorer = model.scorer_create( Some( &group ));
	    let mut samples: Vec<f64> = (0 .. SAMPLE_COUNT).map( |_| model.sample_value( &group )).collect();
	    let fit = density_goodness_of_fit( &mut samples, |value| {
		use statrs::distribution::ContinuousCDF;
		scorer.predictive.cdf( value )
	    });
	    assert!( fit > MIN_GOODNESS_OF_FIT, "goodness of fit {fit}" );
	}
    }
}
