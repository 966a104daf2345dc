//! Price quotes and the primary-then-fallback lookup policy.

use crate::core::config::Settings;
use crate::core::traits::{QuoteProvider, QuoteSource};
use crate::infrastructure::quotes::{ApiNinjasSource, YahooChartSource};
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use log::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    /// Human readable time of the quote, when the source reports one.
    pub timestamp: Option<String>,
}

/// Asks each source in order and returns the first usable quote.
///
/// Failures are logged and skipped; nothing is retried.
pub async fn first_available(sources: &[Box<dyn QuoteSource>], symbol: &str) -> Option<Quote> {
    for source in sources {
        match source.fetch(symbol).await {
            Ok(quote) => {
                debug!("{} quoted {symbol} at {}", source.name(), quote.price);
                return Some(quote);
            }
            Err(e) => warn!("{} has no quote for {symbol}: {e}", source.name()),
        }
    }

    None
}

pub struct FallbackQuoteProvider {
    sources: Vec<Box<dyn QuoteSource>>,
}

#[injectable(QuoteProvider)]
impl FallbackQuoteProvider {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> FallbackQuoteProvider {
        FallbackQuoteProvider::new(vec![
            Box::new(ApiNinjasSource::new(&settings)),
            Box::new(YahooChartSource::new(&settings)),
        ])
    }
}

impl FallbackQuoteProvider {
    pub fn new(sources: Vec<Box<dyn QuoteSource>>) -> FallbackQuoteProvider {
        FallbackQuoteProvider { sources }
    }
}

#[async_trait]
impl QuoteProvider for FallbackQuoteProvider {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        first_available(&self.sources, symbol).await
    }
}
