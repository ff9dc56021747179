//! Stand-in service used by the integration tests
//!
//! Behaves like the kinds of helper processes procwarden supervises: a plain
//! listener, one that shrugs off SIGTERM, a daemon that forks and exits, and
//! one that dies before it ever listens.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "fake-service")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Listen on a port until killed
    Listen {
        port: u16,
        /// Keep running when SIGTERM arrives
        #[arg(long)]
        ignore_term: bool,
        /// Wait before binding
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// Start a detached listener, write its PID, then exit
    ///
    /// The listener binds after a short delay so the parent is gone first.
    Daemonize { port: u16, pid_file: PathBuf },
    /// Print a message on both streams and exit with `code`
    Exit {
        code: i32,
        #[arg(default_value = "goodbye")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    match Args::parse().mode {
        Mode::Listen {
            port,
            ignore_term,
            delay_ms,
        } => listen(port, ignore_term, delay_ms).await,
        Mode::Daemonize { port, pid_file } => {
            let exe = std::env::current_exe()?;
            let child = std::process::Command::new(exe)
                .args(["listen", &port.to_string(), "--delay-ms", "200"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            std::fs::write(&pid_file, child.id().to_string())?;
            println!("forked {}", child.id());
            Ok(())
        }
        Mode::Exit { code, message } => {
            println!("{}", message);
            eprintln!("{}", message);
            std::process::exit(code);
        }
    }
}

async fn listen(port: u16, ignore_term: bool, delay_ms: u64) -> std::io::Result<()> {
    if ignore_term {
        let mut terms = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            while terms.recv().await.is_some() {
                eprintln!("ignoring SIGTERM");
            }
        });
    }

    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    println!("listening on {}", port);

    loop {
        let (socket, _) = listener.accept().await?;
        drop(socket);
    }
}
