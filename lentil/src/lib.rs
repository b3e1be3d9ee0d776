//! Confounder-adjusted adaptive shrinkage.
//!
//! Effect estimates `betahat_j ~ N(beta_j + phi (A v)_j, xi S_j)` are
//! shrunk under a grid mixture-of-normals prior on `beta_j` while the
//! latent confounder scores `v ~ N(0, I)` are inferred jointly by
//! variational EM, accelerated with SQUAREM.

pub mod common;
pub mod elbo;
pub mod factor;
pub mod fit;
pub mod grid;
pub mod params;
pub mod seed;
pub mod simulate;
pub mod squarem;
pub mod sufficient;
pub mod summary;
pub mod update;
pub mod whiten;
