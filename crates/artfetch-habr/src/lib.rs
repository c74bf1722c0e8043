//! Habr source for artfetch
//!
//! Article pages live at `https://habr.com/ru/articles/<id>`. This crate
//! only knows how to read them; fetching and export are in `artfetch-core`.

pub mod extract;

pub use extract::HabrExtractor;

/// Article pages are `BASE_URL` followed by the numeric id
pub const BASE_URL: &str = "https://habr.com/ru/articles/";
