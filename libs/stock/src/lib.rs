mod error;
mod price_client;

pub mod http;
pub mod indicators;
pub mod scoring;
pub mod series;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use price_client::{AccessToken, DailyBar, PriceClient, ProviderConfig};
pub use series::{PricePoint, SeriesConfig, SeriesMaintainer, Snapshot};
pub use store::{StoreClient, StoreConfig};
