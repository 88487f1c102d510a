//! Scrapes news sources into normalized RSS 2.0 documents.
//!
//! See [`feed`] for the scrape-and-aggregate pipeline and [`cache`] for the
//! shared disk cache.

pub mod cache;
pub mod config;
pub mod feed;
pub mod util;
