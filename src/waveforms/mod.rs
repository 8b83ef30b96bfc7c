//! Waveform model, providers and event-window fetching.
//!
//! A `Trace` is an evenly sampled window of one channel. Providers resolve
//! station coordinates and traces for `(trace_id, t0, t1)` requests; the
//! fetcher composes a provider with the travel-time model to produce
//! P-aligned event windows carrying their metadata.

pub mod arrivals;
pub mod fetcher;
pub mod pair;
pub mod provider;
pub mod sac;
pub mod station;
#[cfg(test)]
pub mod testing;
pub mod trace;

pub use arrivals::{first_arrivals, Arrivals};
pub use fetcher::get_event_waveform;
pub use pair::PairFetcher;
pub use provider::{
    ChainProvider, ContinuousArchiveProvider, EventDirectoryProvider, StationCoords,
    WaveformProvider,
};
pub use station::StationCsv;
pub use trace::{EventStats, EventTrace, Trace};
