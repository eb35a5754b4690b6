mod monitor;

use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use serialport::SerialPort;
use shield_ctl::framing::{CommandQueue, LineBuffer};
use shield_ctl::{ControllerConfig, SimController};

use crate::monitor::LogPane;

/// Drive the actuator shield (audio transistor, servos, fan) from serial commands
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// enable debug messages
    #[arg(short, long)]
    verbose: bool,

    /// write log to file instead of stderr
    #[arg(short, long)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Type commands on standard input
    Manual,
    /// Listen for commands on a serial port
    Serial(PortArgs),
    /// Live dashboard; commands are typed in or read from a serial port
    Monitor(PortArgs),
    /// List available serial ports
    Ports,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct PortArgs {
    /// serial port name
    #[arg(short, long)]
    port: Option<String>,

    /// baud rate
    #[arg(short, long)]
    baud: Option<u32>,
}

const BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Milliseconds since the program started, the time base of the control loop.
#[derive(Debug, Clone, Copy)]
pub struct Clock(Instant);

impl Clock {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

/// Non-blocking line reader over a serial port.
pub struct SerialInput {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
    buf: [u8; 128],
}

impl SerialInput {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .with_context(|| format!("Failed to open port '{port_name}'"))?;
        Ok(Self {
            port,
            lines: LineBuffer::new(),
            buf: [0; 128],
        })
    }

    pub fn name(&self) -> String {
        self.port.name().unwrap_or_else(|| String::from("serial"))
    }

    /// Reads whatever is waiting and returns the completed lines. Never waits
    /// for data that has not arrived.
    pub fn poll(&mut self) -> Vec<String> {
        match self.port.bytes_to_read() {
            Ok(0) => Vec::new(),
            Ok(_) => match self.port.read(&mut self.buf) {
                Ok(n) => self.lines.push(&self.buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Vec::new(),
                Err(e) => {
                    error!("Serial port error: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                error!("Serial port error: {e}");
                Vec::new()
            }
        }
    }
}

fn init_logging(args: &Args, pane: &LogPane) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, LevelFilter::Debug);
    } else {
        builder.filter(None, LevelFilter::Info);
    }
    match args.logfile {
        Some(ref logfile) => {
            let file = std::fs::File::create(logfile)
                .with_context(|| format!("Can't create logfile {}", logfile.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None => {
            builder.target(env_logger::Target::Pipe(Box::new(pane.writer())));
        }
    }
    builder.init();
    Ok(())
}

// The main entry point for the command-line controller.
fn main() -> Result<()> {
    let args = Args::parse();
    let pane = LogPane::default();
    init_logging(&args, &pane)?;

    let config = match args.config {
        Some(ref path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };

    let clock = Clock::start();
    let mut controller = SimController::simulated(config);
    info!(
        "Controller ready: servos 3/4/5, fan, 5 oscillators at {} Hz",
        controller.config().audio.sample_rate
    );

    match args.mode {
        Some(Mode::Manual) => run_manual_mode(&mut controller, &clock, &spawn_stdin_reader()),
        Some(Mode::Serial(ports)) => run_serial_mode(&mut controller, &clock, &spawn_stdin_reader(), &ports),
        Some(Mode::Monitor(ports)) => {
            let serial = match ports.port.or_else(|| controller.config().serial.port.clone()) {
                Some(name) => {
                    let baud = ports.baud.unwrap_or(controller.config().serial.baud_rate);
                    Some(SerialInput::open(&name, baud)?)
                }
                None => None,
            };
            monitor::run(&mut controller, &clock, serial, &pane)
        }
        Some(Mode::Ports) => list_ports(),
        None => run_menu(&mut controller, &clock),
    }
}

/// Reads standard input on a helper thread so the control loop can poll it.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn prompt(input: &Receiver<String>, message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    match input.recv() {
        Ok(line) => Ok(line.trim().to_string()),
        Err(_) => bail!("standard input closed"),
    }
}

fn run_menu(controller: &mut SimController, clock: &Clock) -> Result<()> {
    println!("==========================");
    println!("  Shield Controller (sim)  ");
    println!("==========================");

    let input = spawn_stdin_reader();
    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Listen on Serial Port");
        println!("  3. Exit");

        match prompt(&input, "> ")?.as_str() {
            "1" => run_manual_mode(controller, clock, &input)?,
            "2" => run_serial_mode(controller, clock, &input, &PortArgs::default())?,
            "3" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1, 2, or 3."),
        }
    }
    Ok(())
}

// Handles the manual command input mode.
fn run_manual_mode(controller: &mut SimController, clock: &Clock, input: &Receiver<String>) -> Result<()> {
    println!("\n--- Manual Mode ---");
    println!("Enter commands, or type 'back' to return.");

    let cycle = Duration::from_millis(controller.config().control.cycle_ms);
    loop {
        let line = match input.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => break,
        };
        let line = line.filter(|l| !l.trim().is_empty());
        if line.as_deref().map(str::trim) == Some("back") {
            break;
        }

        controller.cycle(clock.now_ms(), line.as_deref());
        thread::sleep(cycle);
    }
    Ok(())
}

// Handles the serial port listening mode.
fn run_serial_mode(
    controller: &mut SimController,
    clock: &Clock,
    input: &Receiver<String>,
    ports: &PortArgs,
) -> Result<()> {
    println!("\n--- Serial Mode ---");

    let port_name = match ports.port.clone().or_else(|| controller.config().serial.port.clone()) {
        Some(name) => name,
        None => match choose_port(input)? {
            Some(name) => name,
            None => return Ok(()),
        },
    };
    let baud_rate = match ports.baud {
        Some(rate) => rate,
        None if ports.port.is_some() || controller.config().serial.port.is_some() => {
            controller.config().serial.baud_rate
        }
        None => match choose_baud_rate(input)? {
            Some(rate) => rate,
            None => return Ok(()),
        },
    };

    let mut serial = match SerialInput::open(&port_name, baud_rate) {
        Ok(serial) => serial,
        Err(e) => {
            eprintln!("[ERROR] {e:#}");
            return Ok(());
        }
    };
    println!("\nListening on {port_name} at {baud_rate} baud. Type 'back' to return.");

    let cycle = Duration::from_millis(controller.config().control.cycle_ms);
    let mut pending = CommandQueue::new();
    loop {
        match input.try_recv() {
            Ok(line) if line.trim() == "back" => break,
            Ok(_) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        for line in serial.poll() {
            println!("> Received: {line}");
            pending.push(line);
        }

        // One command per cycle, fully applied before the next is taken.
        let line = pending.pop();
        controller.cycle(clock.now_ms(), line.as_deref());
        thread::sleep(cycle);
    }
    Ok(())
}

fn choose_port(input: &Receiver<String>) -> Result<Option<String>> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {e}");
            return Ok(None);
        }
    };
    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(None);
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }
    match prompt(input, "Select a port (number): ")?.parse::<usize>() {
        Ok(i) if i < ports.len() => Ok(Some(ports[i].port_name.clone())),
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            Ok(None)
        }
    }
}

fn choose_baud_rate(input: &Receiver<String>) -> Result<Option<u32>> {
    println!("Available baud rates:");
    for (i, rate) in BAUD_RATES.iter().enumerate() {
        println!("  {i}: {rate}");
    }
    match prompt(input, "Select a baud rate (number): ")?.parse::<usize>() {
        Ok(i) if i < BAUD_RATES.len() => Ok(Some(BAUD_RATES[i])),
        _ => {
            eprintln!("[ERROR] Invalid baud rate selection.");
            Ok(None)
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("Could not enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}
