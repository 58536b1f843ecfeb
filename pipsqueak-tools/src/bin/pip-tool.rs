use clap::{Parser, Subcommand};
use pipsqueak::data::CsvLayout;
use pipsqueak::pip::port::replay::{CaptureWriter, ReplayPort};
use pipsqueak::pip::port::{serial, RawPort};
use pipsqueak::pip::{RawPacket, RecvError};
use pipsqueak_tools::{init_logging, Decoders, LogTarget, PipOpts, Settings};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "pip-tool", version, about = "Pipsqueak reader utilities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached readers
    List,

    /// Print decoded packets
    Dump {
        #[command(flatten)]
        pip: PipOpts,

        /// Also print the raw bytes of each packet
        #[arg(long)]
        raw: bool,

        /// Stop after this many packets
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Save raw packets to a capture file for later replay
    Capture {
        #[command(flatten)]
        pip: PipOpts,

        /// Capture file
        #[arg(short = 'f', default_value_t = default_capture_path())]
        file: String,

        /// Stop after this many packets
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Convert a capture file to CSV on stdout
    Csv {
        /// Capture file
        file: PathBuf,

        /// Leave out the hex id column
        #[arg(long)]
        no_hex: bool,

        /// Leave out the moisture column
        #[arg(long)]
        no_moisture: bool,

        /// Binary sensing temperature offset
        #[arg(long, allow_negative_numbers = true)]
        binary_temp_offset: Option<f32>,
    },
}

fn default_capture_path() -> String {
    chrono::Local::now()
        .format("capture.%Y%m%d-%H%M%S.pip")
        .to_string()
}

fn load_settings(pip: &PipOpts) -> Result<Settings, ()> {
    Settings::load(pip.config.as_deref()).map_err(|e| {
        eprintln!("{}", e);
    })
}

/// Feeds packets to `f` until it returns false, the count is reached, or a
/// replay runs out.
fn for_each_packet(
    pip: &PipOpts,
    settings: &Settings,
    count: Option<usize>,
    mut f: impl FnMut(RawPacket) -> Result<(), ()>,
) -> Result<(), ()> {
    let mut pool = pip.open_pool(settings, false).map_err(|e| {
        eprintln!("Cannot open packet source: {}", e);
    })?;
    if pool.is_empty() {
        eprintln!("Waiting for readers...");
    }
    let mut seen = 0;
    loop {
        pool.maybe_rescan(Instant::now());
        let packets = pool.poll();
        let idle = packets.is_empty();
        for pkt in packets {
            f(pkt)?;
            seen += 1;
            if count.is_some_and(|n| seen >= n) {
                return Ok(());
            }
        }
        if pip.replay.is_some() && pool.is_empty() {
            return Ok(());
        }
        if idle {
            std::thread::sleep(settings.idle_sleep());
        }
    }
}

fn list() -> Result<(), ()> {
    let devices = serial::enum_devices().map_err(|e| {
        eprintln!("Cannot enumerate serial ports: {}", e);
    })?;
    if devices.is_empty() {
        println!("No readers found.");
    }
    for dev in devices {
        println!("{}\t{}", dev.name, dev.variant);
    }
    Ok(())
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn dump(pip: &PipOpts, raw: bool, count: Option<usize>) -> Result<(), ()> {
    let settings = load_settings(pip)?;
    let decoders = Decoders::new(settings.binary_temp_offset);
    for_each_packet(pip, &settings, count, |pkt| {
        if raw {
            println!("[{}] {}", pkt.variant, hex(&pkt.data));
        }
        match decoders.get(pkt.variant).decode(&pkt.data, pkt.received_at) {
            Ok(sample) => println!("{}", sample),
            Err(e) => println!("-- {}", e),
        }
        Ok(())
    })
}

fn capture(pip: &PipOpts, file: String, count: Option<usize>) -> Result<(), ()> {
    let settings = load_settings(pip)?;
    let mut writer = CaptureWriter::create(file.as_ref()).map_err(|e| {
        eprintln!("create failed: {}", e);
    })?;
    println!("Capturing to {}...", file);
    let result = for_each_packet(pip, &settings, count, |pkt| {
        writer
            .write(&pkt)
            .and_then(|_| writer.flush())
            .map_err(|e| {
                eprintln!("write failed: {}", e);
            })
    });
    println!("{} packets captured.", writer.frames());
    result
}

fn csv(file: PathBuf, layout: CsvLayout, binary_temp_offset: Option<f32>) -> Result<(), ()> {
    let mut port = ReplayPort::open(&file, false).map_err(|e| {
        eprintln!("open failed: {}", e);
    })?;
    let decoders = Decoders::new(binary_temp_offset);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let write_err = |e: io::Error| {
        eprintln!("write failed: {}", e);
    };
    writeln!(out, "{}", layout.header()).map_err(write_err)?;
    loop {
        match port.recv() {
            Ok(pkt) => match decoders.get(pkt.variant).decode(&pkt.data, pkt.received_at) {
                Ok(sample) => writeln!(out, "{}", layout.row(&sample)).map_err(write_err)?,
                Err(e) => log::debug!("skipped packet: {}", e),
            },
            Err(RecvError::NotReady) => continue,
            Err(RecvError::Disconnected) => break,
            Err(RecvError::IO(e)) => {
                eprintln!("read failed: {}", e);
                return Err(());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = init_logging(LogTarget::Stderr);

    let result = match cli.command {
        Commands::List => list(),
        Commands::Dump { pip, raw, count } => dump(&pip, raw, count),
        Commands::Capture { pip, file, count } => capture(&pip, file, count),
        Commands::Csv {
            file,
            no_hex,
            no_moisture,
            binary_temp_offset,
        } => csv(
            file,
            CsvLayout {
                hex_id: !no_hex,
                moisture: !no_moisture,
            },
            binary_temp_offset,
        ),
    };

    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        eprintln!("FAILED");
        ExitCode::FAILURE
    }
}
