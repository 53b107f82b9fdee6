use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::{ArgGroup, Parser};
use log::debug;
use ndarray::prelude::*;
use serde::Serialize;
use tokio::task::block_in_place;

use crate::Opts;
use crate::cli::{SubCommandExtend, open_index};
use crate::config::{MAX_TOP_N, OutputFormat};
use crate::imdb::ImageIndex;
use crate::index::SearchHit;

#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("query").required(true).multiple(false).args(["image", "like", "text"])))]
pub struct SearchCommand {
    /// 被搜索的图片路径，可以指定多次，每张图片单独输出结果
    #[arg(long, value_name = "PATH")]
    pub image: Vec<PathBuf>,
    /// 使用索引中已有图片作为查询
    #[arg(long, value_name = "KEY")]
    pub like: Option<String>,
    /// 使用文本作为查询，需要模型支持
    #[arg(long)]
    pub text: Option<String>,
    /// 将多张查询图片的向量取平均后作为一次查询
    #[arg(long, requires = "image")]
    pub mean: bool,
    /// 输出结果数量
    #[arg(short, long, default_value_t = 10)]
    pub count: usize,
    /// 从结果中排除的图片，可以指定多次
    #[arg(short, long, value_name = "KEY")]
    pub exclude: Vec<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct QueryResult<'a> {
    query: String,
    hits: &'a [SearchHit],
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = block_in_place(|| open_index(opts, false))?;
        let (names, queries) = block_in_place(|| self.encode_queries(&index))?;

        let excludes = self.exclude.iter().cloned().collect::<HashSet<_>>();
        let count = self.count.min(MAX_TOP_N);
        debug!("搜索 {} 个查询，返回前 {} 个结果", names.len(), count);
        let result = index.search(queries.view(), count, &excludes)?;

        let result = names
            .into_iter()
            .zip(&result)
            .map(|(query, hits)| QueryResult { query, hits })
            .collect::<Vec<_>>();
        print_result(&result, self.output_format)
    }
}

impl SearchCommand {
    /// 计算所有查询向量，返回每个查询的名称和向量矩阵
    fn encode_queries(&self, index: &ImageIndex) -> Result<(Vec<String>, Array2<f32>)> {
        let dim = index.index().dim();
        let (names, vectors) = if let Some(key) = &self.like {
            let v = index.embedding_of(key).with_context(|| format!("图片不在索引中: {key}"))?;
            (vec![key.clone()], vec![v])
        } else if let Some(text) = &self.text {
            (vec![text.clone()], vec![index.encode_text(text)?])
        } else {
            let vectors = self
                .image
                .iter()
                .map(|path| {
                    index
                        .encode_image_file(path)
                        .with_context(|| format!("无法读取图片: {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;
            let names = self.image.iter().map(|p| p.display().to_string()).collect();
            (names, vectors)
        };

        if self.mean && vectors.len() > 1 {
            let n = vectors.len() as f32;
            let mut sum = vec![0f32; dim];
            for v in &vectors {
                ensure!(v.len() == dim, "查询向量维数错误");
                sum.iter_mut().zip(v).for_each(|(a, b)| *a += b);
            }
            sum.iter_mut().for_each(|a| *a /= n);
            return Ok((vec!["_mean_".to_string()], Array2::from_shape_vec((1, dim), sum)?));
        }

        let rows = vectors.len();
        let flat = vectors.into_iter().flatten().collect::<Vec<_>>();
        let queries = Array2::from_shape_vec((rows, dim), flat).context("查询向量维数错误")?;
        Ok((names, queries))
    }
}

fn print_result(result: &[QueryResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (i, r) in result.iter().enumerate() {
                if result.len() > 1 {
                    if i > 0 {
                        println!();
                    }
                    println!("# {}", r.query);
                }
                for hit in r.hits {
                    println!("{:.4}\t{}", hit.similarity, hit.path);
                }
            }
        }
    }
    Ok(())
}
