pub mod catalog;
pub mod cli;
pub mod config;
pub mod embed;
pub mod imdb;
pub mod index;
pub mod thumbs;
pub mod utils;

pub use config::Opts;
pub use imdb::{ImageIndex, ImageIndexBuilder};
