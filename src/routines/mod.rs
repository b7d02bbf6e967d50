// Block-bootstrap resampling
pub mod bootstrap;
// Input series and resamples
pub mod data;
// CO2 radiative forcing
pub mod forcing;
// EIV negative log-likelihood and its gradient
pub mod likelihood;
// Least squares and polynomials
pub mod linalg;
// Routines for logging
pub mod logger;
// Minimizers
pub mod optimization;
// Routines for output
pub mod output;
// Routines for settings
pub mod settings;
