//! Entry point for `microtcp`, a bandwidth test for the protocol.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  The server accepts one connection, writes everything it receives to
//! a file and reports throughput; the client streams a file to the server.
//! With `--tcp` both sides run the same transfer over kernel TCP instead, as a
//! baseline to compare against.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use microtcp::{Connection, Socket};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Bytes moved per read/write call.
const CHUNK_SIZE: usize = 4096;

/// Reliable byte stream over UDP: bandwidth test.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive one stream and store it in a file.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Where to write the received bytes.
        #[arg(short, long)]
        file: PathBuf,
        /// Use kernel TCP instead of microtcp.
        #[arg(long)]
        tcp: bool,
    },
    /// Send a file to a running server.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
        /// Use kernel TCP instead of microtcp.
        #[arg(long)]
        tcp: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, file, tcp } => {
            log::info!("Starting {} server on {bind}", transport_name(tcp));
            if tcp {
                serve_tcp(bind, file).await
            } else {
                serve(bind, file).await
            }
        }
        Mode::Client { server, file, tcp } => {
            log::info!("Starting {} client, connecting to {server}", transport_name(tcp));
            if tcp {
                upload_tcp(server, file).await
            } else {
                upload(server, file).await
            }
        }
    }
}

async fn serve(bind: SocketAddr, path: PathBuf) -> Result<()> {
    let mut out = File::create(&path)
        .await
        .with_context(|| format!("cannot create {}", path.display()))?;
    let mut conn = Connection::bind_udp(bind).await?;
    let peer = conn.accept().await.context("handshake failed")?;
    println!("Connection from {peer}");

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0usize;
    let start = Instant::now();
    loop {
        let n = conn.recv(&mut buf).await.context("receive failed")?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .await
            .with_context(|| format!("cannot write to {}", path.display()))?;
        total += n;
    }
    let elapsed = start.elapsed();
    out.flush().await?;

    print_statistics(total, elapsed);
    log::debug!("{:?}", conn.stats());
    conn.shutdown().await.context("teardown failed")?;
    Ok(())
}

async fn upload(server: SocketAddr, path: PathBuf) -> Result<()> {
    let mut input = File::open(&path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let local: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let mut conn = Connection::new(Socket::bind(local).await?);
    conn.connect(server).await.context("handshake failed")?;
    println!("Connection established");

    println!("Starting sending data...");
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0usize;
    let start = Instant::now();
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        conn.send(&buf[..n]).await.context("send failed")?;
        total += n;
    }
    let elapsed = start.elapsed();
    println!("Data sent. Terminating...");

    print_statistics(total, elapsed);
    let stats = conn.stats();
    println!(
        "Segments sent: {}  retransmitted: {}  fast retransmits: {}  timeouts: {}",
        stats.segments_sent, stats.retransmissions, stats.fast_retransmits, stats.timeouts
    );
    conn.shutdown().await.context("teardown failed")?;
    Ok(())
}

fn transport_name(tcp: bool) -> &'static str {
    if tcp {
        "TCP"
    } else {
        "microtcp"
    }
}

async fn serve_tcp(bind: SocketAddr, path: PathBuf) -> Result<()> {
    let mut out = File::create(&path)
        .await
        .with_context(|| format!("cannot create {}", path.display()))?;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot listen on {bind}"))?;
    let (mut stream, peer) = listener.accept().await.context("accept failed")?;
    println!("Connection from {peer}");

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0usize;
    let start = Instant::now();
    loop {
        let n = stream.read(&mut buf).await.context("receive failed")?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .await
            .with_context(|| format!("cannot write to {}", path.display()))?;
        total += n;
    }
    let elapsed = start.elapsed();
    out.flush().await?;

    print_statistics(total, elapsed);
    Ok(())
}

async fn upload_tcp(server: SocketAddr, path: PathBuf) -> Result<()> {
    let mut input = File::open(&path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("cannot connect to {server}"))?;
    println!("Connection established");

    println!("Starting sending data...");
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0usize;
    let start = Instant::now();
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await.context("send failed")?;
        total += n;
    }
    stream.shutdown().await.context("teardown failed")?;
    let elapsed = start.elapsed();
    println!("Data sent. Terminating...");

    print_statistics(total, elapsed);
    Ok(())
}

fn print_statistics(bytes: usize, elapsed: Duration) {
    let megabytes = bytes as f64 / (1024.0 * 1024.0);
    let seconds = elapsed.as_secs_f64();
    println!("Data transferred: {megabytes:.6} MB");
    println!("Transfer time: {seconds:.6} seconds");
    if seconds > 0.0 {
        println!("Throughput achieved: {:.6} MB/s", megabytes / seconds);
    }
}
