// Pearson correlation between all rows of two matrices with missing values.
// The matrix method assembles the coefficients from five GEMMs.

use csv::WriterBuilder;
use flate2::{write::GzEncoder, Compression};
use log::{debug, info};
use ndarray::Array2;
use std::{env, error::Error, fs::File, io::Cursor, path::Path, time::Instant};
use strum_macros::{Display, EnumString};
use tar::{Builder, Header};

use mpcc::{io, load_operands, naive, pearson, DataType, OperandsConfig};

const USAGE: &str = "Usage: mpcc [matA_file] [matB_file] [num_threads] [--threads T] [--method matrix|naive] [--seed S] [--m M] [--n N] [--p P] [--output PATH] [--compare PATH] [--time]
Missing matrix files are synthesized with the given shape and seed and written back.
--output: .tar.gz writes a TSV archive, any other name writes the text matrix format
--compare: reference result matrix to report the relative 2-norm difference against
--threads: worker threads, same as the third positional argument
--time: enable detailed timing output";

#[derive(EnumString, Display, Clone, Copy)]
#[strum(ascii_case_insensitive)]
enum Method {
    #[strum(serialize = "Matrix", serialize = "Gemm", to_string = "Matrix")]
    Matrix,
    #[strum(serialize = "Naive")]
    Naive,
}

struct RunConfig {
    path_a: String,
    path_b: String,
    method: Method,
    num_threads: Option<usize>,
    time_tracking: bool,
    output: Option<String>,
    compare: Option<String>,
    operands: OperandsConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            path_a: "matA.dat".to_string(),
            path_b: "matB.dat".to_string(),
            method: Method::Matrix,
            num_threads: None,
            time_tracking: false,
            output: None,
            compare: None,
            operands: OperandsConfig::default(),
        }
    }
}

/// Value of `--name VALUE` or `--name=VALUE` at `args[*i]`, advancing `i`
/// past it. `None` when `args[*i]` is a different argument.
fn flag_value(args: &[String], i: &mut usize, name: &str) -> Result<Option<String>, Box<dyn Error>> {
    let arg = &args[*i];
    if arg == name {
        let value = args
            .get(*i + 1)
            .ok_or_else(|| format!("Missing value for {}", name))?;
        *i += 2;
        return Ok(Some(value.clone()));
    }
    if let Some(value) = arg.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')) {
        *i += 1;
        return Ok(Some(value.to_string()));
    }
    Ok(None)
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, Box<dyn Error>> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value).into())
}

fn parse_args() -> Result<RunConfig, Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    parse_args_from(&args)
}

/// Parse a full argument vector, program name first. Positionals are
/// matrix A, matrix B and the thread count, in that order.
fn parse_args_from(args: &[String]) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = RunConfig::default();
    let mut positional = 0;

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].clone();
        if arg == "--help" || arg == "-h" {
            return Err(USAGE.into());
        } else if arg == "--time" {
            config.time_tracking = true;
            i += 1;
        } else if let Some(value) = flag_value(args, &mut i, "--threads")? {
            config.num_threads = Some(parse_number(&value, "--threads")?);
        } else if let Some(value) = flag_value(args, &mut i, "--method")? {
            config.method = value.parse()?;
        } else if let Some(value) = flag_value(args, &mut i, "--seed")? {
            config.operands.seed = parse_number(&value, "--seed")?;
        } else if let Some(value) = flag_value(args, &mut i, "--m")? {
            config.operands.m = parse_number(&value, "--m")?;
        } else if let Some(value) = flag_value(args, &mut i, "--n")? {
            config.operands.n = parse_number(&value, "--n")?;
        } else if let Some(value) = flag_value(args, &mut i, "--p")? {
            config.operands.p = parse_number(&value, "--p")?;
        } else if let Some(value) = flag_value(args, &mut i, "--output")? {
            config.output = Some(value);
        } else if let Some(value) = flag_value(args, &mut i, "--compare")? {
            config.compare = Some(value);
        } else if arg.starts_with("--") {
            return Err(format!("Unknown argument: {}\n{}", arg, USAGE).into());
        } else {
            match positional {
                0 => config.path_a = arg,
                1 => config.path_b = arg,
                2 => config.num_threads = Some(parse_number(&arg, "num_threads")?),
                _ => return Err(format!("Unexpected argument: {}\n{}", arg, USAGE).into()),
            }
            positional += 1;
            i += 1;
        }
    }

    Ok(config)
}

fn file_stem(path: &str) -> &str {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("matrix");
    stem.strip_suffix(".dat").unwrap_or(stem)
}

/// `sqrt(sum (reference - computed)^2) / sqrt(sum reference^2)`
fn relative_norm_difference(reference: &Array2<DataType>, computed: &Array2<DataType>) -> (f64, f64, f64) {
    let mut ref_ss = 0.0f64;
    let mut diff_ss = 0.0f64;
    for (&r, &c) in reference.iter().zip(computed.iter()) {
        let r = r as f64;
        let d = r - c as f64;
        ref_ss += r * r;
        diff_ss += d * d;
    }
    let ref_norm = ref_ss.sqrt();
    let diff_norm = diff_ss.sqrt();
    (ref_norm, diff_norm, diff_norm / ref_norm)
}

fn write_tsv_archive(
    corr: &Array2<DataType>,
    tar_gz_path: &str,
    tsv_name: &str,
) -> Result<(), Box<dyn Error>> {
    let mut csv_buf = Vec::<u8>::new();
    {
        let mut wtr = WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(&mut csv_buf);

        let col_ids: Vec<String> = (0..corr.ncols()).map(|j| format!("B{}", j)).collect();
        wtr.write_record(std::iter::once("").chain(col_ids.iter().map(String::as_str)))?;

        for (i, row) in corr.rows().into_iter().enumerate() {
            let row_id = format!("A{}", i);
            let row_vals: Vec<String> = row.iter().map(|&r| r.to_string()).collect();
            wtr.write_record(
                std::iter::once(row_id.as_str()).chain(row_vals.iter().map(String::as_str)),
            )?;
        }
        wtr.flush()?;
    }

    let tar_gz_file = File::create(tar_gz_path)?;
    let enc = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut header = Header::new_gnu();
    header.set_size(csv_buf.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    tar_builder.append_data(&mut header, tsv_name, &mut Cursor::new(csv_buf))?;
    tar_builder.into_inner()?.finish()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = parse_args()?;

    // Configure thread pool
    if let Some(threads) = config.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| format!("Failed to set thread pool: {}", e))?;
        println!("Using {} threads.", threads);
    } else {
        println!("Using all available CPU cores.");
    }

    // Data loading
    let load_start = if config.time_tracking {
        Some(Instant::now())
    } else {
        None
    };
    let mut operands = load_operands(&config.path_a, &config.path_b, &config.operands)?;
    let load_duration = load_start.map(|start| start.elapsed());

    if let Some(duration) = load_duration {
        println!("Matrices loaded in {:.3} seconds.", duration.as_secs_f64());
    }

    let (m, n, p) = operands.dims();
    println!("Matrix dimensions: m={} n={} p={}", m, n, p);
    if operands.b_transposed {
        println!("Transposed B for computational efficiency in GEMMs.");
    }

    // Correlation calculation
    let calc_start = Instant::now();
    let correlation_matrix = match config.method {
        Method::Matrix => {
            println!("Computing Pearson correlations (matrix method)...");
            pearson::correlation_cross_matrix_in_place(&mut operands.a, &mut operands.b)?
        }
        Method::Naive => {
            println!("Computing Pearson correlations (naive method)...");
            naive::correlation_cross_matrix(&operands.a, &operands.b)?
        }
    };
    let calc_duration = calc_start.elapsed();
    drop(operands);

    if config.time_tracking {
        let secs = calc_duration.as_secs_f64();
        let gflops = 5.0 * 2.0 * (m as f64) * (n as f64) * (p as f64) / secs / 1.0e9;
        println!(
            "{} correlations calculated in {:.3} seconds ({:.3} GFLOP/s).",
            config.method, secs, gflops
        );
    }

    if let Some(reference_path) = &config.compare {
        let reference = io::read_matrix(reference_path)?;
        if reference.dim() != correlation_matrix.dim() {
            return Err(format!(
                "Reference matrix {} is {}x{}, computed result is {}x{}",
                reference_path,
                reference.nrows(),
                reference.ncols(),
                m,
                p
            )
            .into());
        }
        let (ref_norm, diff_norm, relative) =
            relative_norm_difference(&reference, &correlation_matrix);
        println!(
            "Reference 2-norm={:e}, difference 2-norm={:e}, relative difference={:e}",
            ref_norm, diff_norm, relative
        );
    }

    // Output writing
    let output_start = if config.time_tracking {
        Some(Instant::now())
    } else {
        None
    };
    let output_base = format!("{}_{}_pcc", file_stem(&config.path_a), file_stem(&config.path_b));
    let output_path = config
        .output
        .clone()
        .unwrap_or_else(|| format!("{}.tar.gz", output_base));

    if output_path.ends_with(".tar.gz") {
        let tsv_name = format!("{}.tsv", output_base);
        debug!("writing {} into {}", tsv_name, output_path);
        write_tsv_archive(&correlation_matrix, &output_path, &tsv_name)?;
    } else {
        io::write_matrix(&output_path, &correlation_matrix)?;
    }
    info!("wrote {}x{} correlation matrix to {}", m, p, output_path);
    let output_duration = output_start.map(|start| start.elapsed());

    if let Some(duration) = output_duration {
        println!("Output written in {:.3} seconds.", duration.as_secs_f64());
    }

    if let (Some(load_dur), Some(output_dur)) = (load_duration, output_duration) {
        let total_duration = load_dur + calc_duration + output_dur;

        println!(
            "Data loading:           {:8.3} seconds",
            load_dur.as_secs_f64()
        );
        println!(
            "Correlation calculation: {:8.3} seconds",
            calc_duration.as_secs_f64()
        );
        println!(
            "Output writing:         {:8.3} seconds",
            output_dur.as_secs_f64()
        );
        println!(
            "Total time:             {:8.3} seconds",
            total_duration.as_secs_f64()
        );
    }

    Ok(())
}
