// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rprm command-line client
//!
//! Plays the remote processor side against a running `rprm-server`.
//!
//! # Usage
//!
//! ```bash
//! # Request a resource, show what the host granted, release it
//! rprmctl probe gpio-clk
//!
//! # Hold a clock at 200 MHz for ten seconds
//! rprmctl constrain gpio-clk --scale 200000000 --hold 10
//!
//! # Send raw message bytes (hex) and decode the acknowledgment
//! rprmctl raw 00000000
//! ```

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rprm::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use rprm::{Client, ClientError, ConstraintSet, Reply, TcpChannel};

/// rprm command-line client
#[derive(Parser, Debug)]
#[command(name = "rprmctl")]
#[command(about = "Exercise an rprm resource manager daemon")]
#[command(version)]
struct Args {
    /// Daemon address
    #[arg(short, long, default_value = "127.0.0.1:7450")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Request a resource, print the grant, release it
    Probe {
        /// Resource type name
        name: String,

        /// Type-specific request arguments, as hex
        #[arg(long)]
        args: Option<String>,
    },

    /// Request a resource and apply constraints to it
    Constrain {
        /// Resource type name
        name: String,

        /// Frequency in Hz
        #[arg(long)]
        scale: Option<i64>,

        /// Latency bound in microseconds
        #[arg(long)]
        latency: Option<i64>,

        /// Bandwidth in KiB/s
        #[arg(long)]
        bandwidth: Option<i64>,

        /// Seconds to hold the resource before releasing it
        #[arg(long, default_value = "0")]
        hold: u64,
    },

    /// Send one raw message (hex) on a fresh channel
    Raw {
        /// Message bytes as hex, e.g. 00000000 for CONNECT
        hex: String,

        /// Send CONNECT first so the message runs on a bound channel
        #[arg(long)]
        connect: bool,
    },
}

fn main() {
    let Args { server, command } = Args::parse();

    let result = match command {
        Commands::Probe { name, args } => cmd_probe(&server, &name, args.as_deref()),
        Commands::Constrain {
            name,
            scale,
            latency,
            bandwidth,
            hold,
        } => {
            let mut constraints = ConstraintSet::new();
            if let Some(v) = scale {
                constraints = constraints.with_scale(v);
            }
            if let Some(v) = latency {
                constraints = constraints.with_latency(v);
            }
            if let Some(v) = bandwidth {
                constraints = constraints.with_bandwidth(v);
            }
            cmd_constrain(&server, &name, constraints, Duration::from_secs(hold))
        }
        Commands::Raw { hex, connect } => cmd_raw(&server, &hex, connect),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn open(server: &str) -> Result<Client<TcpChannel>> {
    let channel = TcpChannel::connect(server, DEFAULT_MAX_MESSAGE_SIZE)
        .with_context(|| format!("connecting to {}", server))?;
    Ok(Client::new(channel))
}

fn cmd_probe(server: &str, name: &str, args: Option<&str>) -> Result<()> {
    let request_args = match args {
        Some(hex) => parse_hex(hex)?,
        None => Vec::new(),
    };

    let mut client = open(server)?;
    let conn = client.connect()?;
    let grant = client
        .request(name, &request_args)
        .with_context(|| format!("requesting '{}'", name))?;

    println!("{}", format!("Resource '{}'", name).cyan().bold());
    println!("  Connection: {}", conn);
    println!("  Id:         {}", grant.id);
    println!("  Base:       0x{:08x}", grant.base);
    if !grant.response.is_empty() {
        println!("  Response:   {}", format_hex(&grant.response));
    }
    match client.max_frequency(grant.id) {
        Ok(max) => println!("  Max freq:   {} Hz", max),
        Err(ClientError::Status { status, .. }) => {
            println!("  Max freq:   {}", format!("n/a (status {})", status).yellow())
        }
        Err(e) => return Err(e.into()),
    }

    client.release(grant.id)?;
    client.disconnect()?;
    println!("  {}", "released".green());
    Ok(())
}

fn cmd_constrain(
    server: &str,
    name: &str,
    constraints: ConstraintSet,
    hold: Duration,
) -> Result<()> {
    if constraints.mask.is_empty() {
        bail!("nothing to apply: pass --scale, --latency or --bandwidth");
    }

    let mut client = open(server)?;
    client.connect()?;
    let grant = client
        .request(name, &[])
        .with_context(|| format!("requesting '{}'", name))?;
    client
        .set_constraints(grant.id, constraints)
        .with_context(|| format!("constraining '{}' ({:?})", name, constraints.mask))?;
    println!(
        "{} '{}' #{}: {:?}",
        "Applied".green().bold(),
        name,
        grant.id,
        constraints.mask
    );

    if !hold.is_zero() {
        println!("  holding for {:?}", hold);
        thread::sleep(hold);
    }

    client.release(grant.id)?;
    client.disconnect()?;
    Ok(())
}

fn cmd_raw(server: &str, hex: &str, connect: bool) -> Result<()> {
    let bytes = parse_hex(hex)?;
    let mut client = open(server)?;
    if connect {
        client.connect()?;
    }

    let reply = client.call_raw(&bytes)?;
    let status = if reply.status() == 0 {
        "0".green()
    } else {
        reply.status().to_string().red()
    };
    println!("  Action: 0x{:x}", reply.action());
    println!("  Status: {}", status);
    if let Reply::Request(ack) = &reply {
        println!("  Id:     {}", ack.resource_id);
        println!("  Base:   0x{:08x}", ack.base_address);
    }
    if !reply.payload().is_empty() {
        println!("  Extra:  {}", format_hex(reply.payload()));
    }
    Ok(())
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in '{}'", text);
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s: String = pair.iter().collect();
            u8::from_str_radix(&s, 16).with_context(|| format!("bad hex byte '{}'", s))
        })
        .collect()
}

fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
