use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use winery_core::{
    apply_command, build_headless_app_with_config, enable_persistence, load_scheduler_config_from_env,
    FileStore,
};
use winery_runtime::CommandPayload;

struct Request {
    payload: CommandPayload,
    reply: Sender<Vec<String>>,
}

fn main() {
    let (config, metadata) = load_scheduler_config_from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bind = match config.command_bind() {
        Ok(bind) => bind,
        Err(err) => {
            warn!(target: "winery::server", error = %err, "server.start_failed");
            return;
        }
    };

    let mut app = build_headless_app_with_config(config.clone());
    if config.save().enabled {
        let store = FileStore::new(config.save().dir.clone(), config.save().format);
        match enable_persistence(&mut app, store) {
            Ok(tasks) => info!(
                target: "winery::server",
                dir = %config.save().dir.display(),
                tasks,
                "persistence.loaded"
            ),
            Err(err) => warn!(
                target: "winery::server",
                error = %err,
                "persistence.load_failed"
            ),
        }
    }

    let requests = match spawn_command_listener(bind) {
        Ok(requests) => requests,
        Err(err) => {
            warn!(target: "winery::server", %bind, error = %err, "server.bind_failed");
            return;
        }
    };

    info!(
        target: "winery::server",
        command_bind = %bind,
        config = ?metadata.path(),
        "Winery headless server ready"
    );

    while let Ok(request) = requests.recv() {
        let lines = match apply_command(&mut app, &request.payload) {
            Ok(lines) => {
                info!(
                    target: "winery::server",
                    command = ?request.payload,
                    "command.applied"
                );
                lines
            }
            Err(err) => {
                warn!(
                    target: "winery::server",
                    command = ?request.payload,
                    error = %err,
                    "command.rejected"
                );
                vec![format!("error: {err}")]
            }
        };
        // The client may already have disconnected.
        let _ = request.reply.send(lines);
    }
}

fn spawn_command_listener(bind_addr: SocketAddr) -> std::io::Result<Receiver<Request>> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;

    let (sender, receiver) = unbounded::<Request>();
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(target: "winery::server", %addr, "client.connected");
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!(target: "winery::server", error = %err, "client.accept_failed");
                thread::sleep(Duration::from_millis(200));
            }
        }
    });

    Ok(receiver)
}

fn handle_client(stream: TcpStream, sender: Sender<Request>) {
    // Accepted sockets inherit non-blocking mode on some platforms.
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(target: "winery::server", error = %err, "client.setup_failed");
        return;
    }
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(target: "winery::server", error = %err, "client.setup_failed");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let lines = match CommandPayload::parse(trimmed) {
                    Ok(payload) => {
                        let (reply, response) = bounded(1);
                        if sender.send(Request { payload, reply }).is_err() {
                            break;
                        }
                        match response.recv() {
                            Ok(lines) => lines,
                            Err(_) => break,
                        }
                    }
                    Err(err) => {
                        warn!(target: "winery::server", input = trimmed, error = %err, "command.invalid");
                        vec![format!("error: {err}")]
                    }
                };
                if write_lines(&mut writer, &lines).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(target: "winery::server", error = %err, "client.read_failed");
                break;
            }
        }
    }
}

fn write_lines(writer: &mut TcpStream, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        writeln!(writer, "{line}")?;
    }
    writer.flush()
}
