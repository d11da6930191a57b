/*
Copyright 2025 The ptwalk Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! `pt_walk TABLE ADDRESS`: look up ADDRESS in the translation tables
//! rooted at TABLE and print every level visited.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use ptwalk_common::vmem::MemoryReader;
use ptwalk_host::args::{WalkRequest, parse_number, parse_walk_args};
use ptwalk_host::report::{Outcome, WalkReport};
use ptwalk_host::{
    CoreDumpReader, GdbRemoteReader, OutputFormat, PageTableWalker, PhysImageReader, PtWalkError,
    TableAddressMode, WalkerConfiguration,
};
use tracing_subscriber::EnvFilter;

/// Exit status when the arguments are unusable and nothing was read
const USAGE_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "pt_walk",
    version,
    about = "Walk AArch64 (4KB granule, 48-bit VA) translation tables"
)]
struct Cli {
    #[command(flatten)]
    source: Source,

    /// Physical address of the memory image's first byte
    #[arg(long, value_name = "ADDR", value_parser = number, default_value = "0")]
    image_base: u64,

    /// How table addresses found in descriptors are read [default:
    /// linear-map for --gdb, physical otherwise]. An image is always
    /// read by physical address
    #[arg(long, value_enum, conflicts_with = "image")]
    address_mode: Option<AddressMode>,

    /// Virtual address of the kernel's linear map of physical memory
    #[arg(long, value_name = "ADDR", value_parser = number, conflicts_with = "image",
          default_value_t = WalkerConfiguration::DEFAULT_LINEAR_MAP_BASE)]
    linear_map_base: u64,

    /// How long to wait for the GDB stub to answer
    #[arg(long, value_name = "MS", default_value_t = u64::from(WalkerConfiguration::DEFAULT_GDB_TIMEOUT))]
    gdb_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// More logging on stderr (repeat for more); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// The level 0 table (a physical address or raw TTBR value), then
    /// the address to look up
    #[arg(value_name = "TABLE ADDRESS")]
    args: Vec<String>,
}

/// Where the target's memory is read from
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Source {
    /// A raw physical memory image
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// An ELF core dump
    #[arg(long, value_name = "PATH")]
    core: Option<PathBuf>,

    /// A GDB remote stub, e.g. QEMU started with -s
    #[arg(long, value_name = "HOST:PORT")]
    gdb: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AddressMode {
    Physical,
    LinearMap,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        }
    }
}

fn number(arg: &str) -> std::result::Result<u64, String> {
    parse_number(arg).map_err(|e| e.to_string())
}

impl Cli {
    fn configuration(&self) -> WalkerConfiguration {
        let mode = match self.address_mode {
            Some(AddressMode::Physical) => TableAddressMode::Physical,
            Some(AddressMode::LinearMap) => TableAddressMode::LinearMap {
                base: self.linear_map_base,
            },
            None if self.source.gdb.is_some() => TableAddressMode::LinearMap {
                base: self.linear_map_base,
            },
            None => TableAddressMode::Physical,
        };
        WalkerConfiguration::new(
            mode,
            Some(Duration::from_millis(self.gdb_timeout_ms)),
            self.format.into(),
        )
    }

    fn open_reader(
        &self,
        config: &WalkerConfiguration,
    ) -> Result<Box<dyn MemoryReader<Error = PtWalkError>>> {
        let mode = config.get_table_address_mode();
        if let Some(path) = &self.source.image {
            let reader = PhysImageReader::open(path, self.image_base)
                .with_context(|| format!("reading memory image {}", path.display()))?;
            return Ok(Box::new(reader));
        }
        if let Some(path) = &self.source.core {
            let reader = CoreDumpReader::open(path, mode)
                .with_context(|| format!("reading core file {}", path.display()))?;
            return Ok(Box::new(reader));
        }
        if let Some(address) = &self.source.gdb {
            let reader = GdbRemoteReader::connect(address.as_str(), mode, config.get_gdb_timeout())
                .with_context(|| format!("connecting to gdb stub at {address}"))?;
            return Ok(Box::new(reader));
        }
        // clap requires one of the sources
        anyhow::bail!("no memory source given")
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_log::LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn walk(cli: &Cli, request: &WalkRequest) -> Result<ExitCode> {
    let config = cli.configuration();
    let walker = PageTableWalker::new(cli.open_reader(&config)?);
    let report = WalkReport::from_outcome(request, walker.walk(request))?;
    let rendered = report.render(config.get_output_format())?;
    print!("{rendered}");
    if matches!(config.get_output_format(), OutputFormat::Json) {
        println!();
    }
    Ok(match report.result {
        Outcome::ReadFailed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("pt_walk: could not set up logging: {e}");
    }

    // nothing is read from the target until the arguments are known good
    let request = match parse_walk_args(cli.args.as_slice()) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(USAGE_ERROR);
        }
    };
    tracing::debug!(?request, "walking");

    match walk(&cli, &request) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pt_walk: {e:#}");
            ExitCode::FAILURE
        }
    }
}
