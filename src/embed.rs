use std::sync::Arc;

use anyhow::{Result, bail, ensure};
use image::DynamicImage;
use image::imageops::FilterType;

/// 图片/文本向量模型
///
/// 同一个输入必须得到相同的向量，输出不要求归一化
pub trait Embedder: Send + Sync {
    /// 输出向量的维数
    fn dim(&self) -> usize;

    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    fn encode_text(&self, text: &str) -> Result<Vec<f32>>;
}

impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        (**self).encode_image(image)
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        (**self).encode_text(text)
    }
}

/// 计算图片向量并检查维数
pub fn embed_image(embedder: &dyn Embedder, image: &DynamicImage) -> Result<Vec<f32>> {
    let v = embedder.encode_image(image)?;
    ensure!(v.len() == embedder.dim(), "向量维数错误：期望 {}，实际 {}", embedder.dim(), v.len());
    Ok(v)
}

/// 计算文本向量并检查维数
pub fn embed_text(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let v = embedder.encode_text(text)?;
    ensure!(v.len() == embedder.dim(), "向量维数错误：期望 {}，实际 {}", embedder.dim(), v.len());
    Ok(v)
}

/// 旋转不变包装：对 0/90/180/270 度旋转的图片分别计算向量后取平均
///
/// 构建索引和编码查询图片必须使用同一个包装，否则相似度会有偏差
pub struct RotationAveraged<E> {
    inner: E,
}

impl<E: Embedder> RotationAveraged<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Embedder> Embedder for RotationAveraged<E> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let rotations = [image.rotate90(), image.rotate180(), image.rotate270()];
        let mut sum = self.inner.encode_image(image)?;
        for rotated in &rotations {
            let v = self.inner.encode_image(rotated)?;
            ensure!(v.len() == sum.len(), "旋转后的向量维数不一致");
            sum.iter_mut().zip(v).for_each(|(a, b)| *a += b);
        }
        let n = (rotations.len() + 1) as f32;
        sum.iter_mut().for_each(|a| *a /= n);
        Ok(sum)
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.encode_text(text)
    }
}

/// 内置的像素向量：缩放为 side x side 的灰度图，输出去均值后的亮度
///
/// 不依赖任何神经网络，只适合查找近似重复的图片
pub struct PixelEmbedder {
    side: u32,
}

impl PixelEmbedder {
    pub fn new(side: u32) -> Self {
        assert!(side > 0, "side must be positive");
        Self { side }
    }
}

impl Default for PixelEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Embedder for PixelEmbedder {
    fn dim(&self) -> usize {
        (self.side * self.side) as usize
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let gray = image.resize_exact(self.side, self.side, FilterType::Triangle).to_luma8();
        let mut v = gray.as_raw().iter().map(|&p| p as f32 / 255.).collect::<Vec<_>>();
        let mean = v.iter().sum::<f32>() / v.len() as f32;
        v.iter_mut().for_each(|x| *x -= mean);
        Ok(v)
    }

    fn encode_text(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("像素向量不支持文本查询")
    }
}
