#![allow(dead_code)]

use std::fs;
use std::path::Path;

use anyhow::Result;
use image::{ImageFormat, RgbImage};

/// 生成一张带有条纹的测试图片，不同的 seed 得到方向和频率不同的图案
pub fn pattern(seed: u32, width: u32, height: u32) -> RgbImage {
    let freq = 1 + seed % 5;
    let diagonal = seed % 2 == 1;
    RgbImage::from_fn(width, height, |x, y| {
        let t = if diagonal { x + y * (seed % 3 + 1) } else { x * freq + y / (seed % 4 + 1) };
        let v = ((t * 37 + seed * 11) % 256) as u8;
        image::Rgb([v, v.wrapping_mul(3), 255 - v])
    })
}

/// 把图片以 PNG 格式写入 root 下的相对路径
pub fn write_png(root: &Path, key: &str, image: &RgbImage) -> Result<()> {
    let path = root.join(key);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// 在 root 下生成 n 张图片：img0.png, img1.png ...
pub fn populate(root: &Path, n: u32) -> Result<Vec<String>> {
    let mut keys = vec![];
    for i in 0..n {
        let key = format!("img{i}.png");
        write_png(root, &key, &pattern(i, 64, 64))?;
        keys.push(key);
    }
    keys.sort();
    Ok(keys)
}
