//! Area-opening demo: decodes an 8-bit grayscale PNG, builds its max-tree,
//! scans subtree pixel counts bottom-up, discards every component smaller
//! than `lambda`, and re-encodes the filtered image.
//!
//! This binary exercises the whole engine end to end but is deliberately
//! thin — argument parsing and PNG I/O only, no algorithmic logic of its
//! own.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use thiserror::Error;

use maxtree_algos::{maxtree, reconstruct_image, tree_scan, PoolConfig, ThreadPool};
use maxtree_image::{Connectivity, DefaultBlockShape, Image};

#[derive(Debug, Parser)]
#[clap(
    version,
    about = "Max-tree area-opening filter",
    arg_required_else_help = true,
    infer_long_args = true
)]
struct CliOpts {
    /// Input PNG (8-bit grayscale)
    input_image: PathBuf,

    /// Output PNG (8-bit grayscale)
    output_image: PathBuf,

    /// Minimum surviving component area, in pixels
    lambda: u32,

    /// Worker thread count override, default min(num_cpus, 256)
    #[clap(short = 't', long)]
    threads: Option<usize>,

    /// Dump the constructed max-tree's parent array as JSON to this path
    #[clap(long)]
    dump_parents: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read input PNG {path}")]
    PngDecode {
        path: PathBuf,
        #[source]
        source: png::DecodingError,
    },
    #[error("input PNG {path} is not 8-bit grayscale")]
    UnsupportedPixelFormat { path: PathBuf },
    #[error("failed to write output PNG {path}")]
    PngEncode {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },
    #[error("failed to open {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize parent array")]
    Dump(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    env_logger::init();

    let opts = CliOpts::parse();
    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(opts: CliOpts) -> Result<(), CliError> {
    let (width, height, values) = read_grayscale_png(&opts.input_image)?;
    info!("loaded {}x{} image from {}", width, height, opts.input_image.display());

    let pool = ThreadPool::new(PoolConfig {
        n_threads: opts.threads.unwrap_or_else(|| PoolConfig::default().n_threads),
    });

    let image = Image::<u8, 2>::new(&values, [width, height], Connectivity::FaceAndDiagonal)
        .expect("decoded PNG buffer always matches its own declared dimensions");

    let n = values.len();
    let mut parents = vec![0u32; n];
    maxtree::<u8, 2, DefaultBlockShape>(&pool, &image, &mut parents);

    if let Some(path) = &opts.dump_parents {
        let json = maxtree_algos::dump::parents_to_json(&parents)?;
        std::fs::write(path, json).map_err(|source| CliError::Io { path: path.clone(), source })?;
        info!("dumped parent array to {}", path.display());
    }

    let area = tree_scan::<u32, _, _>(&pool, &parents, |_| 1u32, |a, b| a + b);
    let lambda = opts.lambda;
    let mut filtered = vec![0u8; n];
    reconstruct_image(&pool, &values, &parents, |i| area[i] >= lambda, &mut filtered);

    write_grayscale_png(&opts.output_image, width, height, &filtered)?;
    info!("wrote filtered image to {}", opts.output_image.display());

    Ok(())
}

fn read_grayscale_png(path: &PathBuf) -> Result<(usize, usize, Vec<u8>), CliError> {
    let file = File::open(path).map_err(|source| CliError::Io { path: path.clone(), source })?;
    let decoder = png::Decoder::new(file);
    let mut reader = decoder
        .read_info()
        .map_err(|source| CliError::PngDecode { path: path.clone(), source })?;

    let info = reader.info();
    if info.color_type != png::ColorType::Grayscale || info.bit_depth != png::BitDepth::Eight {
        return Err(CliError::UnsupportedPixelFormat { path: path.clone() });
    }

    let width = info.width as usize;
    let height = info.height as usize;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader
        .next_frame(&mut buf)
        .map_err(|source| CliError::PngDecode { path: path.clone(), source })?;
    buf.truncate(frame.buffer_size());

    Ok((width, height, buf))
}

fn write_grayscale_png(path: &PathBuf, width: usize, height: usize, values: &[u8]) -> Result<(), CliError> {
    let file = File::create(path).map_err(|source| CliError::Io { path: path.clone(), source })?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width as u32, height as u32);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|source| CliError::PngEncode { path: path.clone(), source })?;
    writer
        .write_image_data(values)
        .map_err(|source| CliError::PngEncode { path: path.clone(), source })?;

    Ok(())
}
