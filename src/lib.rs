
pub mod conformance;
pub mod error;
pub mod model;
pub mod random;

pub use error::{ModelError, Result};
pub use model::{Example, Model, Record};
pub use model::{BetaBernoulli, DirichletDiscrete, GammaPoisson, NormalInvChiSq};
