use std::fs::OpenOptions;
use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;

use wirefs::disk::RemoteDisk;
use wirefs::fs::Fs;
use wirefs::shell::Shell;

/// File-system server: connects to a disk process, serves one client.
#[derive(Parser)]
#[command(name = "wirefs", version, about)]
struct Args {
    /// Address of the disk process.
    #[arg(long, default_value = "127.0.0.1:10356")]
    disk: String,

    /// Address to listen on for the terminal client.
    #[arg(long, default_value = "127.0.0.1:10357")]
    listen: String,

    /// Log file, appended across runs.
    #[arg(long, default_value = "fs.log")]
    log_file: PathBuf,

    /// Log to stderr instead of the log file.
    #[arg(long)]
    log_stderr: bool,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if !args.log_stderr {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.log_file)
            .with_context(|| format!("opening {}", args.log_file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let stream = TcpStream::connect(&args.disk)
        .with_context(|| format!("connecting to disk at {}", args.disk))?;
    let disk = RemoteDisk::new(stream).context("probing disk geometry")?;
    let mut fs = Fs::new(disk);

    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("listening on {}", args.listen))?;
    info!("waiting for a client on {}", args.listen);
    let (client, peer) = listener.accept().context("accepting client")?;
    info!("client connected from {}", peer);

    let reader = BufReader::new(client.try_clone().context("splitting client stream")?);
    Shell::new(&mut fs, reader, client)
        .serve()
        .context("client session")?;
    info!("session ended");
    Ok(())
}
