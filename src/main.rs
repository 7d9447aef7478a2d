use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use netisp::constants::{ATTEMPTS, PORT, REPLY_TIMEOUT};
use netisp::transport::Transport;
use netisp::{
    DeviceDb, InProgressPolicy, NetworkProgrammer, Programmer, SessionConfig, UdpTransport,
};

#[derive(Parser)]
#[command(
    name = "netisp",
    version,
    about = "Command-line programmer for microcontrollers running the UDP network bootloader"
)]
struct Cli {
    /// Connect to the target at this address instead of broadcasting a discovery
    #[arg(long, global = true, conflicts_with = "configure")]
    ip: Option<Ipv4Addr>,
    /// Assign this address to the target answering the broadcast
    #[arg(long, global = true)]
    configure: Option<Ipv4Addr>,
    /// MAC address assigned together with --configure
    #[arg(long, global = true, value_parser = parse_mac, default_value = "CF:8B:C1:B5:B8:0D")]
    mac: [u8; 6],
    /// UDP port of the bootloader
    #[arg(long, global = true, default_value_t = PORT)]
    port: u16,
    /// Reply timeout in milliseconds
    #[arg(long, global = true, default_value_t = REPLY_TIMEOUT.as_millis() as u64)]
    timeout: u64,
    /// Transmissions of a request before giving up
    #[arg(long, global = true, default_value_t = ATTEMPTS)]
    attempts: u32,
    /// Restart the reply timeout whenever the target reports progress
    #[arg(long, global = true)]
    extend_on_progress: bool,
    /// More output, repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get info about the connected target
    Info,
    /// Read memory, to a file or as a hexdump
    Read {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32)]
        size: u32,
        /// Write the raw contents here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Erase the block at an address
    Erase {
        #[arg(value_parser = parse_u32)]
        address: u32,
    },
    /// Erase the whole code flash
    ChipErase,
    /// Reset the target
    Reset,
    /// Ask the target for the checksum of a memory region
    Checksum {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32)]
        size: u32,
    },
    /// Program a raw binary image, verify it and reset
    Flash {
        path: PathBuf,
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        address: u32,
        #[arg(long)]
        no_verify: bool,
        #[arg(long)]
        no_reset: bool,
    },
    /// Compare memory with a raw binary image
    Verify {
        path: PathBuf,
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        address: u32,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    res.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let bytes = s
        .split([':', '-'])
        .map(|b| u8::from_str_radix(b, 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| format!("invalid MAC address {:?}: {}", s, e))?;
    bytes
        .try_into()
        .map_err(|_| format!("MAC address {:?} must have 6 bytes", s))
}

fn progress_bar(len: usize, message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{msg:9} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}",
        )?
        .progress_chars("#>-"),
    );
    pb.set_message(message);
    Ok(pb)
}

/// End of a read region, which must stay in the 32-bit address space.
fn end_address(address: u32, size: usize) -> Result<u32> {
    u32::try_from(size)
        .ok()
        .and_then(|size| address.checked_add(size))
        .with_context(|| {
            format!(
                "{} bytes at 0x{:08X} run past the end of the address space",
                size, address
            )
        })
}

fn read_memory<T: Transport>(
    prog: &mut Programmer<NetworkProgrammer<'_, T>>,
    address: u32,
    size: usize,
) -> Result<Vec<u8>> {
    end_address(address, size)?;
    let max_read = prog.descriptor().max_read;
    let pb = progress_bar(size, "Reading")?;
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        let chunk = max_read.min(size - data.len());
        data.extend(prog.read(address + data.len() as u32, chunk)?);
        pb.set_position(data.len() as u64);
    }
    pb.finish_and_clear();
    Ok(data)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let devices = DeviceDb::load().context("failed to load the device registry")?;
    let config = SessionConfig {
        timeout: Duration::from_millis(cli.timeout),
        attempts: cli.attempts,
        in_progress: if cli.extend_on_progress {
            InProgressPolicy::ExtendDeadline
        } else {
            InProgressPolicy::KeepDeadline
        },
    };
    let transport = UdpTransport::open()?;
    let mut prog = Programmer::new(NetworkProgrammer::new(transport, &devices, config));

    let bootloader = if let Some(ip) = cli.ip {
        prog.connect(ip, cli.port)?
    } else if let Some(ip) = cli.configure {
        prog.configure(ip, cli.mac, cli.port)?
    } else {
        prog.discover(cli.port)?
    };

    match cli.command {
        Command::Info => {
            let device = prog.device()?;
            log::info!("Target: {}", bootloader);
            log::info!(
                "Device: {} ({} family, flash {}KiB, write {} B, erase {} B)",
                device,
                device.family,
                device.flash_size / 1024,
                device.write_size,
                device.erase_size
            );
            if let Some(peer) = prog.strategy().peer() {
                log::info!("Address: {}", peer);
            }
        }
        Command::Read {
            address,
            size,
            output,
        } => {
            let data = read_memory(&mut prog, address, size as usize)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    log::info!("Wrote {} bytes to {}", data.len(), path.display());
                }
                None => {
                    let mut dump = Vec::new();
                    hxdmp::hexdump(&data, &mut dump)?;
                    println!("{}", String::from_utf8_lossy(&dump));
                }
            }
        }
        Command::Erase { address } => {
            prog.erase(address)?;
            log::info!("Erased block at 0x{:06X}", address);
        }
        Command::ChipErase => {
            prog.chip_erase()?;
            log::info!("Code flash erased");
        }
        Command::Reset => {
            prog.reset()?;
        }
        Command::Checksum { address, size } => {
            let checksum = prog.checksum(address, size as usize)?;
            println!("0x{:08X}", checksum);
        }
        Command::Flash {
            path,
            address,
            no_verify,
            no_reset,
        } => {
            let image = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            log::info!("Firmware size: {}", image.len());

            let pb = progress_bar(image.len(), "Flashing")?;
            prog.flash(address, &image, |n| pb.set_position(n as u64))?;
            pb.finish();

            if !no_verify {
                let pb = progress_bar(image.len(), "Verifying")?;
                prog.verify(address, &image, |n| pb.set_position(n as u64))?;
                pb.finish();
                log::info!("Verified!");
            }
            if !no_reset {
                prog.reset()?;
            }
        }
        Command::Verify { path, address } => {
            let image = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let pb = progress_bar(image.len(), "Verifying")?;
            prog.verify(address, &image, |n| pb.set_position(n as u64))?;
            pb.finish();
            log::info!("Verified!");
        }
    }

    Ok(())
}
