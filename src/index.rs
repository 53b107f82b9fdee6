use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Result, ensure};
use log::{debug, info, warn};
use ndarray::prelude::*;
use ndarray_npy::{read_npy, write_npy};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::IndexDir;
use crate::utils::remove_file_if_exists;

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 行号，与文件列表中的位置一致
    pub index: usize,
    /// 图片相对路径
    pub path: String,
    /// 余弦相似度
    pub similarity: f32,
}

/// 向量索引
///
/// 矩阵的第 i 行对应文件列表中的第 i 个文件，所有行均已归一化，
/// 因此余弦相似度就是与归一化后的查询向量的点积
#[derive(Debug, Clone)]
pub struct VectorIndex {
    matrix: Array2<f32>,
    files: Vec<String>,
}

impl VectorIndex {
    /// 使用原始（未归一化）的向量构建索引
    ///
    /// # Arguments
    ///
    /// * `files` - 有序的文件列表
    /// * `embeddings` - 与文件列表一一对应的向量，每行一个
    pub fn build(files: Vec<String>, mut embeddings: Array2<f32>) -> Result<Self> {
        ensure!(
            embeddings.nrows() == files.len(),
            "向量数量 {} 与文件数量 {} 不一致",
            embeddings.nrows(),
            files.len()
        );
        // 模长为 0 的行保持全 0，与任何查询的相似度都是 0
        embeddings.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut row| {
            let norm = row.dot(&row).sqrt();
            if norm > 0. {
                row /= norm;
            }
        });
        Ok(Self { matrix: embeddings, files })
    }

    /// 从索引目录中加载，任何文件缺失或格式、形状不一致都视为没有缓存
    pub fn load(dir: &IndexDir) -> Option<Self> {
        let (index_path, files_path) = (dir.index(), dir.files());
        if !index_path.exists() || !files_path.exists() {
            debug!("索引缓存不存在: {}", dir.path().display());
            return None;
        }

        let files = match read_files(&files_path) {
            Ok(files) => files,
            Err(e) => {
                warn!("文件列表损坏 {}: {e}", files_path.display());
                return None;
            }
        };

        let matrix: Array2<f32> = match read_npy(&index_path) {
            Ok(matrix) => matrix,
            Err(e) => {
                warn!("向量矩阵损坏 {}: {e}", index_path.display());
                return None;
            }
        };

        if matrix.nrows() != files.len() {
            warn!("向量矩阵行数 {} 与文件列表长度 {} 不一致", matrix.nrows(), files.len());
            return None;
        }

        info!("从缓存加载索引: {}", index_path.display());
        Some(Self { matrix, files })
    }

    /// 检查当前的文件列表是否与构建索引时使用的完全一致（包括顺序）
    pub fn validate(&self, files: &[String]) -> bool {
        self.files.len() == files.len() && self.files.iter().zip(files).all(|(a, b)| a == b)
    }

    /// 保存到索引目录
    ///
    /// 先删除旧的矩阵文件，再依次通过 rename 替换文件列表和矩阵，
    /// 中途失败时不会出现新文件列表与旧矩阵混用的情况
    pub fn save(&self, dir: &IndexDir) -> Result<()> {
        fs::create_dir_all(dir.path())?;
        remove_file_if_exists(dir.index())?;

        let tmp = dir.files_tmp();
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, &self.files)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, dir.files())?;

        let tmp = dir.index_tmp();
        write_npy(&tmp, &self.matrix)?;
        fs::rename(&tmp, dir.index())?;

        debug!("索引已保存: {} x {}", self.matrix.nrows(), self.matrix.ncols());
        Ok(())
    }

    /// 对每个查询向量返回相似度最高的 top_n 个结果
    pub fn search(&self, queries: ArrayView2<f32>, top_n: usize) -> Result<Vec<Vec<SearchHit>>> {
        self.search_excluding(queries, top_n, &HashSet::new())
    }

    /// 与 [`VectorIndex::search`] 相同，但在截取 top_n 之前先排除指定的文件
    ///
    /// # Arguments
    ///
    /// * `queries` - 查询向量，每行一个，无需归一化
    /// * `top_n` - 每个查询返回的结果数量，超出候选数量时截断
    /// * `excludes` - 需要排除的文件
    pub fn search_excluding(
        &self,
        queries: ArrayView2<f32>,
        top_n: usize,
        excludes: &HashSet<String>,
    ) -> Result<Vec<Vec<SearchHit>>> {
        if self.is_empty() || queries.nrows() == 0 {
            return Ok(vec![vec![]; queries.nrows()]);
        }
        ensure!(
            queries.ncols() == self.dim(),
            "查询向量维数 {} 与索引维数 {} 不一致",
            queries.ncols(),
            self.dim()
        );

        let mut queries = queries.to_owned();
        for mut row in queries.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt();
            if norm > 0. {
                row /= norm;
            }
        }

        // (nq, rows)
        let similarity = queries.dot(&self.matrix.t());

        Ok(similarity
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.select_top(row, top_n, excludes))
            .collect())
    }

    fn select_top(
        &self,
        similarity: ArrayView1<f32>,
        top_n: usize,
        excludes: &HashSet<String>,
    ) -> Vec<SearchHit> {
        let mut candidates = similarity
            .iter()
            .copied()
            .enumerate()
            .filter(|(i, _)| excludes.is_empty() || !excludes.contains(&self.files[*i]))
            .collect::<Vec<_>>();

        let k = top_n.min(candidates.len());
        if k == 0 {
            return vec![];
        }

        // 先用部分选择取出前 k 个，再只对这 k 个排序
        if candidates.len() > k {
            candidates.select_nth_unstable_by(k - 1, rank_order);
            candidates.truncate(k);
        }
        candidates.sort_unstable_by(rank_order);

        candidates
            .into_iter()
            .map(|(index, similarity)| SearchHit {
                index,
                path: self.files[index].clone(),
                similarity,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 向量维数
    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn matrix(&self) -> ArrayView2<'_, f32> {
        self.matrix.view()
    }

    /// 返回文件在索引中的行号
    pub fn position(&self, key: &str) -> Option<usize> {
        self.files.iter().position(|f| f == key)
    }

    /// 返回第 i 行（归一化后的）向量
    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.matrix.row(i)
    }
}

fn read_files(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// 相似度降序，相同时行号小的在前
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
