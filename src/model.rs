
use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

mod beta_bernoulli;
mod dirichlet_discrete;
mod gamma_poisson;
mod normal_inv_chisq;

pub use beta_bernoulli::{BetaBernoulli, BetaBernoulliGroup, BetaBernoulliScorer};
pub use dirichlet_discrete::{DirichletDiscrete, DirichletDiscreteGroup, DirichletDiscreteScorer};
pub use gamma_poisson::{GammaPoisson, GammaPoissonGroup, GammaPoissonScorer};
pub use normal_inv_chisq::{NormalInvChiSq, NormalInvChiSqGroup, NormalInvChiSqScorer};

/// Structured, self-describing record produced by the dump operations
pub type Record = serde_json::Value;

/// Worked example shipped by a family: a hyperparameter record together with
/// values from the family's support. The conformance checks run every
/// contract property against these fixtures.
pub struct Example<M: Model> {
    pub model: Record,
    pub values: Vec<M::Value>,
}

/// Contract between a conjugate distribution family and the inference code
/// driving it.
///
/// A `Model` holds the fixed prior hyperparameters of one family and is
/// immutable after `model_load`. All per-observation state lives in the
/// associated `Group`, a bounded-size sufficient-statistics record that never
/// retains the raw values it has absorbed. The algebra must be exact with
/// respect to the observed multiset:
///
/// - `group_create( values )` equals folding `group_add_value` over the
///   values in any order,
/// - `group_remove_value` undoes `group_add_value` regardless of the calls
///   in between, as long as the remaining multiset is the same,
/// - `group_merge` of groups over disjoint multisets equals the group over
///   their union, under any partition and merge order,
/// - `group_load( group_dump( g ) )` reproduces `g`'s dump.
///
/// Groups are compared through their dumps, never by identity. Models are
/// pure functions of (hyperparameters, statistics) and may be shared across
/// threads freely; a group must only be touched by one thread at a time.
pub trait Model: Sized + Clone + Debug + Serialize + DeserializeOwned {
    type Value: Clone + Debug + PartialEq;
    type Group: Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned;
    type Scorer;

    /// Family name used in error reports
    const FAMILY: &'static str;

    /// Checks the family's constraints on the hyperparameters
    fn validate( &self ) -> Result<()>;

    /// Fixtures for the conformance checks, at least 7 values each
    fn examples() -> Vec<Example<Self>>;

    /// Builds a model from a hyperparameter record
    fn model_load( record: &Record ) -> Result<Self> {
	let model: Self = serde_json::from_value( record.clone() )?;
	model.validate()?;
	Ok( model )
    }

    /// Dumps the hyperparameters; a left inverse of `model_load`
    fn model_dump( &self ) -> Record {
	serde_json::to_value( self ).expect( "hyperparameter records are plain numbers" )
    }

    /// Resets a group to the empty-statistics state in place
    fn group_init( &self, group: &mut Self::Group );

    /// Checks statistics restored from a record, e.g. for shape mismatches
    fn group_check( &self, _group: &Self::Group ) -> Result<()> {
	Ok( () )
    }

    /// Restores a group from a statistics record
    fn group_load( &self, record: &Record ) -> Result<Self::Group> {
	let group: Self::Group = serde_json::from_value( record.clone() )?;
	self.group_check( &group )?;
	Ok( group )
    }

    /// Dumps the multiset-derived statistics; order of past additions is
    /// not recoverable
    fn group_dump( &self, group: &Self::Group ) -> Record {
	serde_json::to_value( group ).expect( "statistics records are plain numbers" )
    }

    /// Builds a group over the given values, equivalent to `group_init`
    /// followed by `group_add_value` for each value
    fn group_create<I>( &self, values: I ) -> Result<Self::Group> where
	I: IntoIterator<Item = Self::Value>,
    {
	let mut group = Self::Group::default();
	self.group_init( &mut group );
	for value in values {
	    self.group_add_value( &mut group, &value )?;
	}
	Ok( group )
    }

    /// Absorbs one observation into the statistics, in constant time
    fn group_add_value( &self, group: &mut Self::Group, value: &Self::Value ) -> Result<()>;

    /// Exact inverse of `group_add_value`. Removing a value that is not in
    /// the group's multiset is reported wherever the statistics can detect
    /// it (count underflow); an undetected bogus removal corrupts the group.
    fn group_remove_value( &self, group: &mut Self::Group, value: &Self::Value ) -> Result<()>;

    /// Combines two groups accumulated under the same model: the
    /// destination absorbs the source, which is consumed. Both groups must
    /// come from this model; a shape mismatch is reported where detectable.
    fn group_merge( &self, destination: &mut Self::Group, source: Self::Group ) -> Result<()>;

    /// Log posterior predictive probability of `value` given the group
    fn score_value( &self, group: &Self::Group, value: &Self::Value ) -> Result<f64> {
	let scorer = self.scorer_create( Some( group ));
	self.scorer_eval( &scorer, value )
    }

    /// Log marginal likelihood of the group's whole multiset under the
    /// prior. The empty multiset is certain, so an empty group scores 0.
    fn score_group( &self, group: &Self::Group ) -> f64;

    /// Draws one value from the posterior predictive distribution. Acquires
    /// the shared random source once; each family documents how many
    /// variates it consumes per draw.
    fn sample_value( &self, group: &Self::Group ) -> Self::Value;

    /// Draws `size` values from the joint generative process: every draw
    /// conditions on the values drawn before it, as when a fresh group of
    /// that size is generated from the prior.
    fn sample_group( &self, size: usize ) -> Vec<Self::Value> {
	let mut group = Self::Group::default();
	self.group_init( &mut group );
	let mut values = Vec::with_capacity( size );
	for _ in 0 .. size {
	    let value = self.sample_value( &group );
	    self.group_add_value( &mut group, &value ).expect( "sampled values lie in the support" );
	    values.push( value );
	}
	values
    }

    /// Precomputes posterior parameters for repeated `score_value` calls
    /// against a fixed group, or against the bare prior if no group is
    /// given. The scorer is a snapshot: it must not be reused after the
    /// group changes.
    fn scorer_create( &self, group: Option<&Self::Group> ) -> Self::Scorer;

    /// Scores a value against the snapshot taken at scorer creation
    fn scorer_eval( &self, scorer: &Self::Scorer, value: &Self::Value ) -> Result<f64>;
}
