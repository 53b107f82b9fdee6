use std::fs;
use std::io;
use std::path::Path;

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use indicatif::ProgressStyle;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("invalid progress bar template")
        .progress_chars("#>-")
}

/// 读取并解码图片，格式根据文件头猜测
pub fn imread(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let data = fs::read(path)?;
    Ok(image::load_from_memory(&data)?)
}

/// 生成正方形缩略图：等比缩放后居中裁剪
pub fn make_thumbnail(image: &DynamicImage, size: u32) -> RgbImage {
    image.resize_to_fill(size, size, FilterType::CatmullRom).to_rgb8()
}

/// 删除文件，文件不存在时忽略
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
