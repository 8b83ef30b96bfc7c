//! Signal operations used by the correlation pipelines.
//!
//! All correlation inputs go through the same preprocessing chain: demean,
//! cosine taper, causal Butterworth bandpass. Cross-correlation is computed
//! by direct lag-loop summation so that pair scanning and template scanning
//! produce numerically identical values for identical windows.

pub mod filter;
pub mod process;
pub mod xcorr;

pub use filter::bandpass;
pub use process::{cosine_taper, demean, preprocess};
pub use xcorr::{xcorr_pair, xcorr_scan, CcResult, ScanCcResult};
