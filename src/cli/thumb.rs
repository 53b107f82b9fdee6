use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::Opts;
use crate::cli::{SubCommandExtend, open_index};

#[derive(Parser, Debug, Clone)]
pub struct ThumbCommand {
    /// 图片相对于图片目录的路径，使用 / 分隔
    pub key: String,
    /// 输出文件，默认写入标准输出
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for ThumbCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = block_in_place(|| open_index(opts, false))?;
        let data = index.thumbnail(&self.key)?;
        if data.is_empty() {
            warn!("没有找到缩略图: {}", self.key);
            return Ok(());
        }

        match &self.output {
            Some(path) => {
                fs::write(path, data)?;
                info!("缩略图已保存到 {}", path.display());
            }
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(data)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}
