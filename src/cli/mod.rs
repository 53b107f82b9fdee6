mod build;
mod search;
mod thumb;

pub use build::*;
pub use search::*;
pub use thumb::*;

use std::sync::Arc;

use crate::config::Opts;
use crate::embed::PixelEmbedder;
use crate::imdb::{ImageIndex, ImageIndexBuilder};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 按命令行参数打开索引，缓存失效时会自动重建
fn open_index(opts: &Opts, force: bool) -> anyhow::Result<ImageIndex> {
    ImageIndexBuilder::with_options(&opts.images, &opts.build)
        .force(force)
        .open(Arc::new(PixelEmbedder::default()))
}
