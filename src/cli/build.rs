use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::Opts;
use crate::cli::{SubCommandExtend, open_index};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    /// 忽略缓存，强制重新生成索引和缩略图
    #[arg(long)]
    pub force: bool,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = block_in_place(|| open_index(opts, self.force))?;
        match index.build_stats() {
            Some(stats) => {
                println!(
                    "indexed {} images, {} failed, {} thumbnails ({} bytes)",
                    stats.total, stats.failed, stats.thumbnails, stats.thumbnail_bytes
                );
            }
            None => {
                info!("索引无需更新");
                println!("index is up to date, {} images", index.index().len());
            }
        }
        Ok(())
    }
}
