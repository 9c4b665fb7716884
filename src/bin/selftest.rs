//! Self-test utility: load a dataset as a key/value map, then check random
//! key lookups through `Searcher::line` against it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process::ExitCode;

use clap::Parser;
use rand::seq::SliceRandom;
use tracing_subscriber::{fmt, EnvFilter};

use bsearch::{Error, Options, Searcher};

#[derive(Parser, Debug)]
#[command(name = "bsearch-selftest")]
#[command(about = "Check random key lookups against a linear read of the dataset")]
struct Args {
    /// Dataset to check (byte-sorted, delimiter-separated, newline-terminated)
    filename: String,

    /// Field separator
    #[arg(short = 't', long, default_value = ",")]
    sep: String,

    /// Number of checks to run (0 = every key)
    #[arg(short, long, default_value = "100")]
    count: usize,

    /// Ignore the first line (header) when doing lookups
    #[arg(short = 'H', long = "hdr")]
    header: bool,

    /// Line buffer size to allocate (max line size), in MB
    #[arg(short = 's', long = "bs", default_value = "1")]
    buffer_mb: usize,

    /// Die on any errors
    #[arg(short, long)]
    fatal: bool,

    /// Display verbose debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();

    // Compressed files cannot be checked with a linear read
    for suffix in [".gz", ".bz2", ".zst", ".br"] {
        if args.filename.ends_with(suffix) {
            eprintln!(
                "{} appears to be compressed - cannot binary search",
                args.filename
            );
            return ExitCode::from(2);
        }
    }

    let options = Options::default().header(args.header);
    let mut searcher = match Searcher::with_options(&args.filename, options) {
        Ok(searcher) => searcher,
        Err(e) => {
            eprintln!("{}: {e}", args.filename);
            return ExitCode::from(2);
        }
    };

    let cmap = match load_csv_map(&args) {
        Ok(cmap) => cmap,
        Err(e) => {
            eprintln!("{}: {e}", args.filename);
            return ExitCode::from(2);
        }
    };
    if args.verbose {
        eprintln!("+ dataset loaded, {} entries", cmap.len());
    }

    let mut keys: Vec<&String> = cmap.keys().collect();
    keys.shuffle(&mut rand::thread_rng());
    if args.count > 0 {
        keys.truncate(args.count);
    }

    let mut ok = 0;
    let mut fail = 0;
    let mut oversize = 0;
    for (i, key) in keys.iter().enumerate() {
        let expect = &cmap[*key];
        let got = match searcher.line(key.as_bytes()) {
            Ok(line) => {
                let line = String::from_utf8_lossy(&line).into_owned();
                let prefix = format!("{key}{}", args.sep);
                line.strip_prefix(prefix.as_str())
                    .map(str::to_string)
                    .unwrap_or(line)
            }
            Err(Error::NotFound) => String::new(),
            Err(Error::KeyExceedsBlocksize) => {
                if args.fatal {
                    println!("Error: lookup on {key:?} got KeyExceedsBlocksize");
                    return ExitCode::from(2);
                }
                oversize += 1;
                continue;
            }
            Err(e) => {
                println!("Error: lookup on {key:?} failed: {e}");
                if args.fatal {
                    return ExitCode::from(2);
                }
                fail += 1;
                continue;
            }
        };
        if args.verbose {
            eprintln!("+ [{i}] {key:?} => got {got:?} / exp {expect:?}");
        }
        if &got != expect {
            println!("Error: lookup on {key:?}: got {got:?}, expected {expect:?}");
            if args.fatal {
                return ExitCode::from(2);
            }
            fail += 1;
        } else {
            ok += 1;
        }
    }

    let total = ok + fail + oversize;
    if fail > 0 || oversize > 0 {
        println!(
            "{fail} / {total} checks failed, {oversize} / {total} oversize keys, {ok} / {total} checks ok"
        );
        ExitCode::from(1)
    } else {
        println!("{ok} / {total} checks ok");
        ExitCode::SUCCESS
    }
}

/// Returns a key => value map for the dataset, treating the first field of
/// each line as the key.
fn load_csv_map(args: &Args) -> std::io::Result<HashMap<String, String>> {
    let fh = File::open(&args.filename)?;
    let mut reader = BufReader::with_capacity(args.buffer_mb * 1024 * 1024, fh);

    let mut cmap = HashMap::new();
    let mut header = args.header;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if header {
            header = false;
            continue;
        }
        let content = line.trim_end_matches('\n');
        match content.split_once(args.sep.as_str()) {
            Some((key, value)) => {
                // keep the first line for duplicate keys, matching Line()
                cmap.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("no separator on line: {content:?}"),
                ));
            }
        }
    }
    Ok(cmap)
}
