use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::INDEX_DIR_NAME;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("图片目录不存在: {0}")]
    NotFound(PathBuf),
    #[error("图片路径不是目录: {0}")]
    NotADirectory(PathBuf),
    #[error("无效的后缀列表: {0}")]
    InvalidSuffix(String),
}

/// 图片目录下所有候选图片的有序列表
///
/// 列表按相对路径字符串升序排列，这个顺序同时也是向量索引的行顺序
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<String>,
}

impl Catalog {
    /// 扫描图片目录
    ///
    /// # Arguments
    ///
    /// * `root` - 图片目录
    /// * `suffix` - 文件后缀名，多个后缀用逗号分隔，不区分大小写
    pub fn scan(root: impl AsRef<Path>, suffix: &str) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(CatalogError::NotFound(root.to_path_buf()).into());
        }
        if !root.is_dir() {
            return Err(CatalogError::NotADirectory(root.to_path_buf()).into());
        }

        let re_suf = suffix_regex(suffix)?;

        info!("开始扫描目录: {}", root.display());
        let mut entries = WalkDir::new(root)
            .into_iter()
            // 不进入索引自己的存储目录
            .filter_entry(|entry| {
                !(entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == INDEX_DIR_NAME)
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("跳过无法访问的路径: {e}");
                    None
                }
            })
            .filter_map(|entry| {
                let path = entry.path();
                if !path.is_file() {
                    return None;
                }
                let ext = path.extension()?;
                if !re_suf.is_match(&ext.to_string_lossy()) {
                    return None;
                }
                let rel = path.strip_prefix(root).ok()?;
                match to_posix(rel) {
                    Some(rel) => Some(rel),
                    None => {
                        warn!("跳过非 UTF-8 路径: {}", path.display());
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        entries.sort_unstable();
        entries.dedup();
        info!("扫描完成，共 {} 张图片", entries.len());

        Ok(Self { root: root.to_path_buf(), entries })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 返回第 i 个文件的完整路径
    pub fn path_of(&self, i: usize) -> PathBuf {
        self.root.join(&self.entries[i])
    }
}

/// 把逗号分隔的后缀列表转换为不区分大小写的正则
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let parts = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>();
    if parts.is_empty() {
        return Err(CatalogError::InvalidSuffix(suffix.to_owned()).into());
    }
    let re = format!("(?i)^({})$", parts.join("|"));
    debug!("后缀匹配规则: {re}");
    Ok(Regex::new(&re)?)
}

/// 将相对路径转换为使用 `/` 分隔的字符串
fn to_posix(path: &Path) -> Option<String> {
    let mut parts = vec![];
    for component in path.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}
