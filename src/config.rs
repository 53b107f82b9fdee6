use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::*;

/// 索引私有目录名，扫描图片时会跳过该目录
pub const INDEX_DIR_NAME: &str = ".index";

/// 单次搜索允许返回的最大结果数量
pub const MAX_TOP_N: usize = 100;

#[derive(Parser, Debug, Clone)]
pub struct BuildOptions {
    /// 对 0/90/180/270 度旋转后的图片分别计算向量并取平均，索引和查询同时生效
    #[arg(long)]
    pub rotation_invariant: bool,
    /// 构建索引时，多少张图片为一个批次
    #[arg(short, long, value_name = "SIZE", default_value_t = 256)]
    pub batch_size: usize,
    /// 缩略图边长（正方形，居中裁剪）
    #[arg(long, value_name = "PIXELS", default_value_t = 224)]
    pub thumbnail_size: u32,
    /// 缩略图 JPEG 质量
    #[arg(long, value_name = "QUALITY", default_value_t = 85, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imclip", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 图片所在目录，索引保存在其中的 .index 子目录
    #[arg(short, long, value_name = "DIR")]
    pub images: PathBuf,
    #[command(flatten)]
    pub build: BuildOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 检查缓存并在图片列表变化时重建索引和缩略图
    Build(BuildCommand),
    /// 从索引中搜索相似图片
    Search(SearchCommand),
    /// 导出一张图片的缩略图
    Thumb(ThumbCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

/// 索引目录，负责所有持久化文件的路径
#[derive(Debug, Clone)]
pub struct IndexDir {
    path: PathBuf,
}

impl IndexDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 图片目录下的默认索引目录
    pub fn for_images(images: impl AsRef<Path>) -> Self {
        Self::new(images.as_ref().join(INDEX_DIR_NAME))
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回向量矩阵文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("index.npy")
    }

    /// 返回向量矩阵临时文件的路径
    pub fn index_tmp(&self) -> PathBuf {
        self.path.join("index.npy.tmp")
    }

    /// 返回构建索引时使用的文件列表路径
    pub fn files(&self) -> PathBuf {
        self.path.join("files.json")
    }

    /// 返回文件列表临时文件的路径
    pub fn files_tmp(&self) -> PathBuf {
        self.path.join("files.json.tmp")
    }

    /// 返回构建索引时使用的选项文件路径
    pub fn options(&self) -> PathBuf {
        self.path.join("options.json")
    }

    /// 返回缩略图数据文件的路径
    pub fn thumbs_data(&self) -> PathBuf {
        self.path.join("thumbs.data")
    }

    /// 返回缩略图偏移表的路径
    pub fn thumbs_index(&self) -> PathBuf {
        self.path.join("thumbs.index")
    }

    /// 返回缩略图偏移表临时文件的路径
    pub fn thumbs_index_tmp(&self) -> PathBuf {
        self.path.join("thumbs.index.tmp")
    }
}
