mod settings;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use x86emu_core::cpu_i386::{RunOutcome, ZeroFlagMode};
use x86emu_core::logging::{LogCategory, LogConfig, LogLevel};
use x86emu_linux::{Debugger, Machine, MachineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ZeroFlagArg {
    /// ZF follows the result of the operation
    Result,
    /// ZF is set when both operands were equal
    Operands,
}

impl From<ZeroFlagArg> for ZeroFlagMode {
    fn from(arg: ZeroFlagArg) -> Self {
        match arg {
            ZeroFlagArg::Result => ZeroFlagMode::Result,
            ZeroFlagArg::Operands => ZeroFlagMode::OperandEquality,
        }
    }
}

/// Run a 32-bit x86 Linux executable
#[derive(Parser)]
#[command(name = "x86emu", version)]
struct Args {
    /// ELF32 executable, or a flat binary with --raw
    image: PathBuf,

    /// Treat the image as a flat binary instead of ELF
    #[arg(long, default_value_t = false)]
    raw: bool,

    /// Load address for --raw images
    #[arg(long, value_parser = parse_number, default_value = "0")]
    load_addr: u32,

    /// Start executing here instead of the image's entry point
    #[arg(long, value_parser = parse_number)]
    entry: Option<u32>,

    /// Initial stack pointer
    #[arg(long, value_parser = parse_number)]
    stack: Option<u32>,

    /// Guest memory size in bytes
    #[arg(long, value_parser = parse_number)]
    memory_size: Option<u32>,

    /// How ADD/SUB/CMP set the zero flag
    #[arg(long, value_enum)]
    zero_flag: Option<ZeroFlagArg>,

    /// Start in single-step debug mode
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// JSON machine configuration (defaults to x86emu.json next to the binary)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final machine state to this file as JSON
    #[arg(long)]
    dump_state: Option<PathBuf>,

    /// Log level for all categories (off, error, warn, info, debug, trace)
    #[arg(long, value_parser = parse_log_level, default_value = "warn")]
    log_level: LogLevel,

    /// Log level for instruction execution
    #[arg(long, value_parser = parse_log_level)]
    log_cpu: Option<LogLevel>,

    /// Log level for system calls
    #[arg(long, value_parser = parse_log_level)]
    log_syscall: Option<LogLevel>,

    /// Log level for the ELF loader
    #[arg(long, value_parser = parse_log_level)]
    log_loader: Option<LogLevel>,
}

/// Decimal or `0x`-prefixed hexadecimal
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_str(s).ok_or_else(|| format!("invalid log level '{}'", s))
}

fn init_logging(args: &Args) {
    let config = LogConfig::global();
    config.set_global_level(args.log_level);
    for (category, level) in [
        (LogCategory::Cpu, args.log_cpu),
        (LogCategory::Syscall, args.log_syscall),
        (LogCategory::Loader, args.log_loader),
    ] {
        if let Some(level) = level {
            config.set_level(category, level);
        }
    }

    env_logger::Builder::new()
        .filter_level(config.max_level().to_filter())
        .parse_default_env()
        .init();
}

fn machine_config(args: &Args) -> Result<MachineConfig> {
    let mut config = settings::load(args.config.as_deref())?;
    if let Some(size) = args.memory_size {
        config.memory_size = size as usize;
    }
    if let Some(stack) = args.stack {
        config.stack_pointer = stack;
    }
    if let Some(mode) = args.zero_flag {
        config.cpu.zero_flag = mode.into();
    }
    Ok(config)
}

fn run(args: &Args) -> Result<u32> {
    let config = machine_config(args)?;
    let image = fs::read(&args.image)
        .with_context(|| format!("Failed to read {}", args.image.display()))?;

    let mut machine = Machine::new(config);
    if args.raw {
        machine.load_raw(args.load_addr, &image)?;
    } else {
        machine
            .load_elf(&image)
            .with_context(|| format!("Failed to load {}", args.image.display()))?;
    }
    if let Some(entry) = args.entry {
        machine.set_entry(entry);
    }
    log::info!(
        "Loaded {} with entry 0x{:08X}, ESP=0x{:08X}",
        args.image.display(),
        machine.entry(),
        config.stack_pointer
    );

    let result = if args.debug {
        let mut debugger = Debugger::stdio();
        debugger.enable()?;
        machine.run_with_debugger(&mut debugger)
    } else {
        machine.run()
    };

    if let Some(path) = &args.dump_state {
        let state = machine.save_state();
        let mut f = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    match result.context("Emulation stopped")? {
        RunOutcome::Exited(code) => {
            println!("Program exited with code {}", code);
            Ok(code)
        }
        RunOutcome::Halted => {
            println!("Program halted");
            Ok(0)
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(&args);

    match run(&args) {
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
