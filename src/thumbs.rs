use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::sync::OnceLock;

use anyhow::{Result, ensure};
use log::{debug, info, warn};
use memmap2::Mmap;
use serde::ser::{SerializeMap, Serializer};

use crate::config::IndexDir;

/// 缩略图存储
///
/// 所有缩略图首尾相接地写在 `thumbs.data` 中，`thumbs.index` 记录每张缩略图的
/// `[begin, end)` 区间。写入只在构建索引时进行一次，之后只读。
pub struct ThumbnailStore {
    dir: IndexDir,
    loaded: OnceLock<LoadedThumbnails>,
}

struct LoadedThumbnails {
    ranges: HashMap<String, (u64, u64)>,
    data: Option<Mmap>,
}

impl LoadedThumbnails {
    fn open(dir: &IndexDir) -> Result<Self> {
        let reader = BufReader::new(File::open(dir.thumbs_index())?);
        let ranges: HashMap<String, (u64, u64)> = serde_json::from_reader(reader)?;

        let file = File::open(dir.thumbs_data())?;
        let len = file.metadata()?.len();
        for (key, &(begin, end)) in &ranges {
            ensure!(
                begin <= end && end <= len,
                "缩略图区间越界: {key} [{begin}, {end}) 文件大小 {len}"
            );
        }

        // 长度为 0 的文件无法 mmap
        let data = if len == 0 { None } else { Some(unsafe { Mmap::map(&file)? }) };

        debug!("已加载 {} 张缩略图，共 {} 字节", ranges.len(), len);
        Ok(Self { ranges, data })
    }

    fn get(&self, key: &str) -> &[u8] {
        let (Some(&(begin, end)), Some(data)) = (self.ranges.get(key), &self.data) else {
            return &[];
        };
        data.get(begin as usize..end as usize).unwrap_or(&[])
    }
}

impl ThumbnailStore {
    pub fn new(dir: IndexDir) -> Self {
        Self { dir, loaded: OnceLock::new() }
    }

    /// 创建一个新的写入器，会清空已有的缩略图
    pub fn appender(&self) -> Result<ThumbnailAppender> {
        ThumbnailAppender::create(&self.dir)
    }

    /// 加载偏移表并 mmap 数据文件，只在第一次调用时生效
    pub fn ensure_loaded(&self) -> Result<()> {
        self.loaded()?;
        Ok(())
    }

    fn loaded(&self) -> Result<&LoadedThumbnails> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded);
        }
        // 并发首次调用时可能重复加载，但只有一份会被保留
        let loaded = LoadedThumbnails::open(&self.dir)?;
        Ok(self.loaded.get_or_init(|| loaded))
    }

    /// 读取一张缩略图，不存在时返回空切片
    ///
    /// 只有在缩略图文件无法加载时才会返回错误
    pub fn thumbnail(&self, key: &str) -> Result<&[u8]> {
        Ok(self.loaded()?.get(key))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.loaded()?.ranges.contains_key(key))
    }

    /// 已索引的缩略图数量
    pub fn len(&self) -> Result<usize> {
        Ok(self.loaded()?.ranges.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// 缩略图写入器
///
/// 每次 [`ThumbnailAppender::append`] 都会把上一张缩略图的区间记录下来，
/// 偏移表在 [`ThumbnailAppender::finish`] 或 drop 时写入磁盘
pub struct ThumbnailAppender {
    dir: IndexDir,
    data: BufWriter<File>,
    /// 已完成的区间，按写入顺序排列
    ranges: Vec<(String, u64, u64)>,
    /// 正在写入的缩略图及其起始位置
    pending: Option<(String, u64)>,
    /// 正在写入的缩略图是否已经失效
    poisoned: bool,
    /// 当前数据文件长度
    position: u64,
    finished: bool,
}

impl ThumbnailAppender {
    fn create(dir: &IndexDir) -> Result<Self> {
        fs::create_dir_all(dir.path())?;
        let data = BufWriter::new(File::create(dir.thumbs_data())?);
        // 先写入一个空表，确保中途失败时偏移表与数据文件仍然一致
        fs::write(dir.thumbs_index(), b"{}")?;
        Ok(Self {
            dir: dir.clone(),
            data,
            ranges: vec![],
            pending: None,
            poisoned: false,
            position: 0,
            finished: false,
        })
    }

    /// 开始写入一张新的缩略图，返回的 sink 直接写入数据文件
    pub fn append(&mut self, key: &str) -> Result<ThumbnailSink<'_>> {
        ensure!(!self.finished, "写入器已关闭");
        self.flush_pending();
        self.pending = Some((key.to_owned(), self.position));
        Ok(ThumbnailSink { appender: self })
    }

    /// 是否还没有完成任何一张缩略图
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 当前数据文件大小
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 记录最后一张缩略图并写入偏移表，返回已索引的缩略图数量
    ///
    /// 只有这里会把最后一张缩略图计入偏移表
    pub fn finish(mut self) -> Result<usize> {
        self.flush_pending();
        self.finalize()?;
        Ok(self.ranges.len())
    }

    fn flush_pending(&mut self) {
        if let Some((key, begin)) = self.pending.take() {
            if self.poisoned {
                warn!("缩略图写入失败，已丢弃: {key}");
            } else {
                self.ranges.push((key, begin, self.position));
            }
        }
        self.poisoned = false;
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.data.flush()?;

        // 先写临时文件再替换，避免偏移表只写了一半
        let tmp = self.dir.thumbs_index_tmp();
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let mut ser = serde_json::Serializer::new(&mut writer);
        let mut map = ser.serialize_map(Some(self.ranges.len()))?;
        for (key, begin, end) in &self.ranges {
            map.serialize_entry(key, &[begin, end])?;
        }
        map.end()?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, self.dir.thumbs_index())?;

        info!("缩略图写入完成：{} 张，共 {} 字节", self.ranges.len(), self.position);
        Ok(())
    }
}

impl Drop for ThumbnailAppender {
    fn drop(&mut self) {
        // 没有调用 finish 就被释放（出错返回或 panic），正在写入的缩略图可能不完整
        if !self.finished {
            if let Some((key, _)) = self.pending.take() {
                warn!("缩略图未写完，已丢弃: {key}");
            }
        }
        if let Err(e) = self.finalize() {
            warn!("保存缩略图偏移表失败: {e}");
        }
    }
}

/// 一张缩略图的写入端
pub struct ThumbnailSink<'a> {
    appender: &'a mut ThumbnailAppender,
}

impl ThumbnailSink<'_> {
    /// 放弃当前缩略图，已写入的数据不会被索引
    pub fn abandon(self) {
        self.appender.poisoned = true;
    }
}

impl Write for ThumbnailSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.appender.data.write(buf) {
            Ok(n) => {
                self.appender.position += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.appender.poisoned = true;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.appender.data.flush().inspect_err(|_| self.appender.poisoned = true)
    }
}
