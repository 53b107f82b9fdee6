use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, bounded};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::config::{BuildOptions, IndexDir};
use crate::embed::{Embedder, RotationAveraged, embed_image, embed_text};
use crate::index::{SearchHit, VectorIndex};
use crate::thumbs::{ThumbnailAppender, ThumbnailStore};
use crate::utils::{imread, make_thumbnail, pb_style, remove_file_if_exists};

/// 一次索引构建的统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// 图片总数
    pub total: usize,
    /// 读取、解码或计算向量失败的图片数量
    pub failed: usize,
    /// 写入的缩略图数量（包括失败图片的空缩略图）
    pub thumbnails: usize,
    /// 缩略图数据文件大小
    pub thumbnail_bytes: u64,
}

/// 与向量一起保存的构建选项，查询时必须使用相同的选项才能复用缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CachedOptions {
    rotation_invariant: bool,
}

impl CachedOptions {
    fn load(dir: &IndexDir) -> Option<Self> {
        let data = fs::read(dir.options()).ok()?;
        match serde_json::from_slice(&data) {
            Ok(options) => Some(options),
            Err(e) => {
                warn!("构建选项文件损坏 {}: {e}", dir.options().display());
                None
            }
        }
    }

    fn save(&self, dir: &IndexDir) -> Result<()> {
        fs::write(dir.options(), serde_json::to_vec(self)?)?;
        Ok(())
    }
}

/// 发送给缩略图写入线程的任务，image 为 None 时写入空缩略图
struct ThumbnailJob {
    key: String,
    image: Option<RgbImage>,
}

/// 单张图片的处理结果
struct Processed {
    embedding: Option<Vec<f32>>,
    thumbnail: Option<RgbImage>,
}

pub struct ImageIndexBuilder {
    images: PathBuf,
    suffix: String,
    rotation_invariant: bool,
    batch_size: usize,
    thumbnail_size: u32,
    jpeg_quality: u8,
    queue_size: usize,
    force: bool,
}

impl ImageIndexBuilder {
    pub fn new(images: impl Into<PathBuf>) -> Self {
        Self {
            images: images.into(),
            suffix: "jpg,jpeg,png".to_string(),
            rotation_invariant: false,
            batch_size: 256,
            thumbnail_size: 224,
            jpeg_quality: 85,
            queue_size: num_cpus::get() * 4,
            force: false,
        }
    }

    /// 使用命令行参数初始化
    pub fn with_options(images: impl Into<PathBuf>, opts: &BuildOptions) -> Self {
        Self::new(images)
            .suffix(opts.suffix.clone())
            .rotation_invariant(opts.rotation_invariant)
            .batch_size(opts.batch_size)
            .thumbnail_size(opts.thumbnail_size)
            .jpeg_quality(opts.jpeg_quality)
    }

    pub fn suffix(mut self, suffix: String) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn rotation_invariant(mut self, rotation_invariant: bool) -> Self {
        self.rotation_invariant = rotation_invariant;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn thumbnail_size(mut self, thumbnail_size: u32) -> Self {
        self.thumbnail_size = thumbnail_size.max(1);
        self
    }

    pub fn jpeg_quality(mut self, jpeg_quality: u8) -> Self {
        self.jpeg_quality = jpeg_quality.clamp(1, 100);
        self
    }

    /// 缩略图写入队列长度，队列满时计算线程会阻塞等待
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    /// 忽略缓存，强制重建
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// 扫描图片目录，加载或重建索引
    pub fn open(&self, embedder: Arc<dyn Embedder>) -> Result<ImageIndex> {
        let embedder: Arc<dyn Embedder> = if self.rotation_invariant {
            Arc::new(RotationAveraged::new(embedder))
        } else {
            embedder
        };

        let catalog = Catalog::scan(&self.images, &self.suffix)?;
        let dir = IndexDir::for_images(&self.images);

        let cached = match self.force {
            true => None,
            false => VectorIndex::load(&dir),
        };

        let options = CachedOptions { rotation_invariant: self.rotation_invariant };
        let (index, stats) = match cached {
            Some(index) if !index.validate(catalog.entries()) => {
                info!("图片列表已变化，重新生成索引");
                self.build(&catalog, &dir, &*embedder, options)?
            }
            Some(_) if CachedOptions::load(&dir) != Some(options) => {
                info!("构建选项已变化，重新生成索引");
                self.build(&catalog, &dir, &*embedder, options)?
            }
            Some(index) if index.dim() != embedder.dim() => {
                info!("缓存的向量维数 {} 与模型不一致，重新生成索引", index.dim());
                self.build(&catalog, &dir, &*embedder, options)?
            }
            Some(index) => {
                info!("使用缓存的索引，共 {} 张图片", index.len());
                (index, None)
            }
            None => self.build(&catalog, &dir, &*embedder, options)?,
        };

        Ok(ImageIndex {
            index,
            thumbs: ThumbnailStore::new(dir),
            embedder,
            stats,
        })
    }

    fn build(
        &self,
        catalog: &Catalog,
        dir: &IndexDir,
        embedder: &dyn Embedder,
        options: CachedOptions,
    ) -> Result<(VectorIndex, Option<BuildStats>)> {
        info!("正在构建索引，可能需要一段时间……");
        fs::create_dir_all(dir.path())?;
        // 旧的矩阵文件必须先删除，构建中断时不会留下与缩略图不一致的索引
        remove_file_if_exists(dir.index())?;

        let appender = ThumbnailStore::new(dir.clone()).appender()?;
        let (tx, rx) = bounded(self.queue_size);
        let quality = self.jpeg_quality;

        // 作用域线程：即使计算过程中 panic，也会等写入线程退出后再继续展开
        let built = thread::scope(|s| -> Result<_> {
            let writer = thread::Builder::new()
                .name("thumbnail-writer".to_string())
                .spawn_scoped(s, move || task_write_thumbnails(appender, rx, quality))?;

            let pb = ProgressBar::new(catalog.len() as u64).with_style(pb_style());
            let mut embeddings = Array2::<f32>::zeros((catalog.len(), embedder.dim()));
            let mut failed = 0;
            let mut aborted = false;

            // NOTE: 按批次并行计算，批内结果按原顺序送入写入线程，保证缩略图文件布局稳定
            'outer: for start in (0..catalog.len()).step_by(self.batch_size) {
                let end = (start + self.batch_size).min(catalog.len());
                let results = (start..end)
                    .into_par_iter()
                    .map(|i| self.process(catalog, i, embedder))
                    .collect::<Vec<_>>();

                for (i, processed) in (start..end).zip(results) {
                    match processed.embedding {
                        Some(v) => embeddings.row_mut(i).assign(&ArrayView1::from(&v)),
                        None => failed += 1,
                    }
                    let key = catalog.entries()[i].clone();
                    let job = ThumbnailJob { key, image: processed.thumbnail };
                    // 写入线程出错退出时发送会失败
                    if tx.send(job).is_err() {
                        aborted = true;
                        break 'outer;
                    }
                    pb.inc(1);
                }
            }

            // 关闭队列，通知写入线程结束
            drop(tx);
            let written = writer.join().map_err(|_| anyhow!("缩略图写入线程崩溃"))??;
            if aborted {
                bail!("缩略图写入线程提前退出");
            }
            pb.finish_with_message("索引构建完成");
            Ok((embeddings, failed, written))
        });
        let (embeddings, failed, (thumbnails, thumbnail_bytes)) = built?;

        options.save(dir)?;
        let index = VectorIndex::build(catalog.entries().to_vec(), embeddings)?;
        index.save(dir)?;

        let stats = BuildStats { total: catalog.len(), failed, thumbnails, thumbnail_bytes };
        info!(
            "索引构建完成：{} 张图片，{} 张失败，缩略图 {} 字节",
            stats.total, stats.failed, stats.thumbnail_bytes
        );
        Ok((index, Some(stats)))
    }

    /// 处理单张图片，失败时返回空向量和空缩略图
    fn process(&self, catalog: &Catalog, i: usize, embedder: &dyn Embedder) -> Processed {
        let path = catalog.path_of(i);
        let result = imread(&path).and_then(|image| {
            let thumbnail = make_thumbnail(&image, self.thumbnail_size);
            let embedding = embed_image(embedder, &image)?;
            Ok((embedding, thumbnail))
        });
        match result {
            Ok((embedding, thumbnail)) => {
                Processed { embedding: Some(embedding), thumbnail: Some(thumbnail) }
            }
            Err(e) => {
                warn!("处理图片失败，使用空向量代替 {}: {e}", path.display());
                Processed { embedding: None, thumbnail: None }
            }
        }
    }
}

/// 缩略图写入线程：唯一的写入者，按接收顺序编码并追加
fn task_write_thumbnails(
    mut appender: ThumbnailAppender,
    rx: Receiver<ThumbnailJob>,
    quality: u8,
) -> Result<(usize, u64)> {
    while let Ok(job) = rx.recv() {
        let mut sink = appender.append(&job.key)?;
        let Some(image) = job.image else {
            continue;
        };
        let encoded = JpegEncoder::new_with_quality(&mut sink, quality).encode_image(&image);
        if let Err(e) = encoded {
            warn!("缩略图编码失败 {}: {e}", job.key);
            sink.abandon();
        }
    }
    let bytes = appender.position();
    let count = appender.finish()?;
    debug!("缩略图写入线程退出");
    Ok((count, bytes))
}

/// 已经可以使用的索引，包括向量索引、缩略图和构建时使用的模型
///
/// 构建完成后只读，可以通过 `Arc` 在多个线程间共享
pub struct ImageIndex {
    index: VectorIndex,
    thumbs: ThumbnailStore,
    embedder: Arc<dyn Embedder>,
    stats: Option<BuildStats>,
}

impl ImageIndex {
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn thumbs(&self) -> &ThumbnailStore {
        &self.thumbs
    }

    /// 本次打开时的构建统计，使用缓存时为 None
    pub fn build_stats(&self) -> Option<&BuildStats> {
        self.stats.as_ref()
    }

    /// 使用与构建索引时相同的模型（包括旋转平均）计算图片向量
    pub fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        embed_image(&*self.embedder, image)
    }

    pub fn encode_image_file(&self, path: impl AsRef<Path>) -> Result<Vec<f32>> {
        self.encode_image(&imread(path)?)
    }

    pub fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        embed_text(&*self.embedder, text)
    }

    /// 返回索引中已有图片的（归一化后的）向量
    pub fn embedding_of(&self, key: &str) -> Option<Vec<f32>> {
        self.index.position(key).map(|i| self.index.row(i).to_vec())
    }

    /// 搜索相似图片，excludes 中的图片会在截取 top_n 之前被排除
    pub fn search(
        &self,
        queries: ArrayView2<f32>,
        top_n: usize,
        excludes: &HashSet<String>,
    ) -> Result<Vec<Vec<SearchHit>>> {
        self.index.search_excluding(queries, top_n, excludes)
    }

    /// 读取缩略图，不存在时返回空切片
    pub fn thumbnail(&self, key: &str) -> Result<&[u8]> {
        self.thumbs.thumbnail(key)
    }
}
