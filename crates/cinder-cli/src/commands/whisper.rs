use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context as _;
use cinder_repair::{FillMode, fill_archives};
use cinder_whisper::{self as whisper, AggregationMethod, Header};
use serde_json::json;

use super::Format;

pub fn fill(src: &Path, dst: &Path, overwrite: bool) -> anyhow::Result<()> {
    let mode = if overwrite {
        FillMode::Overwrite
    } else {
        FillMode::Gaps
    };
    let now = whisper::now();
    let stats = fill_archives(src, dst, now, now, mode)
        .with_context(|| format!("failed to fill {} from {}", dst.display(), src.display()))?;
    println!(
        "{}: filled {} gaps, {} points",
        dst.display(),
        stats.gaps,
        stats.points
    );
    Ok(())
}

pub fn aggregate(path: &Path, method: &str, xff: Option<f32>) -> anyhow::Result<()> {
    let method: AggregationMethod = method.parse()?;
    let old = whisper::set_aggregation_method(path, method, xff)
        .with_context(|| format!("failed to update {}", path.display()))?;
    println!("{}: aggregation method {old} -> {method}", path.display());
    Ok(())
}

pub fn info(path: &Path, format: Format) -> anyhow::Result<()> {
    let header = whisper::info(path).with_context(|| format!("failed to read {}", path.display()))?;
    print!("{}", render_info(&header, format)?);
    Ok(())
}

fn render_info(header: &Header, format: Format) -> anyhow::Result<String> {
    if format == Format::Json {
        let doc = json!({
            "header": header,
            "file_size": header.file_size(),
        });
        return Ok(format!("{}\n", serde_json::to_string_pretty(&doc)?));
    }

    let mut out = String::new();
    writeln!(out, "aggregation_method: {}", header.aggregation_method)?;
    writeln!(out, "max_retention: {}", header.max_retention)?;
    writeln!(out, "x_files_factor: {}", header.x_files_factor)?;
    writeln!(out, "file_size: {}", header.file_size())?;
    for (i, archive) in header.archives.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "archive {i}")?;
        writeln!(out, "  offset: {}", archive.offset)?;
        writeln!(out, "  seconds_per_point: {}", archive.seconds_per_point)?;
        writeln!(out, "  points: {}", archive.points)?;
        writeln!(out, "  retention: {}", archive.retention())?;
        writeln!(out, "  size: {}", archive.size())?;
    }
    Ok(out)
}
