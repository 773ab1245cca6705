use clap::{ArgAction, Parser};
use log::{error, info, LevelFilter, Metadata, Record};
use rcon_session::{AuthHandshake, Config, Encoding, Session};
use std::{error::Error, time::Duration};
use tokio::io::{self, AsyncBufReadExt, BufReader};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger;

/// Run commands on a Source engine server over rcon.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = Config::DEFAULT_HOST)]
    host: String,
    #[arg(short, long, default_value_t = Config::DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: String,
    /// Largest packet we are willing to send, 0 for no limit.
    #[arg(long, default_value_t = Config::DEFAULT_MAXIMUM_PACKET_SIZE)]
    max_packet_size: usize,
    /// Packet body encoding: ascii or utf8.
    #[arg(long, default_value_t = Encoding::Ascii)]
    encoding: Encoding,
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Skip response value frames until the server's auth response arrives.
    #[arg(long)]
    await_auth_response: bool,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Commands to run in order. Read from stdin, one per line, if omitted.
    commands: Vec<String>,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            host: self.host.clone(),
            port: self.port,
            maximum_packet_size: self.max_packet_size,
            encoding: self.encoding,
            timeout: Duration::from_millis(self.timeout_ms),
            auth_handshake: if self.await_auth_response {
                AuthHandshake::AwaitAuthResponse
            } else {
                AuthHandshake::FirstFrame
            },
        }
    }

    fn level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(args.level()));

    let config = args.config();
    info!("connecting to {}", config.address());
    let session = Session::connect(config).await?;
    session.authenticate(&args.password).await?;
    info!("authenticated");

    let outcome = if args.commands.is_empty() {
        run_stdin(&session).await
    } else {
        run_all(&session, &args.commands).await
    };

    if let Err(e) = session.disconnect().await {
        error!("error while disconnecting: {}", e);
    }

    info!("bye");
    outcome
}

async fn run_all(session: &Session, commands: &[String]) -> Result<(), Box<dyn Error>> {
    for command in commands {
        println!("{}", session.execute(command).await?);
    }
    Ok(())
}

async fn run_stdin(session: &Session) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim_end();
        if command.is_empty() {
            continue;
        }
        println!("{}", session.execute(command).await?);
    }
    Ok(())
}
