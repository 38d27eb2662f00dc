use std::{
    error::Error,
    io,
    net::{SocketAddr, TcpStream},
};

use clap::Parser;
use sqlrunner::{
    ReplCommand,
    cli::{Session, prompt, render},
    protocol::{ProtocolTransport, Response},
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of a running sqlrunner_server
    address: SocketAddr,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let mut transport = ProtocolTransport::new(TcpStream::connect(cli.address)?);
    let mut session = Session::default();

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock(), session.current())? {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };
        let exit = cmd == ReplCommand::Exit;

        let req = match session.request(cmd) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        transport.write_request(req)?;
        let resp = transport.read_response()?;
        println!("{}", render(&resp));

        if exit || resp == Response::ConnectionClosed {
            break;
        }
    }

    Ok(())
}
