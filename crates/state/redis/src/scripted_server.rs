//! A scripted RESP server for exercising sessions without a real Redis.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the server does with one command.
pub(crate) enum Reply {
    /// Write these raw RESP bytes.
    Raw(Vec<u8>),
    /// Close the connection without answering.
    HangUp,
}

impl Reply {
    pub(crate) fn ok() -> Self {
        Self::Raw(b"+OK\r\n".to_vec())
    }

    pub(crate) fn bulk(value: &[u8]) -> Self {
        let mut raw = format!("${}\r\n", value.len()).into_bytes();
        raw.extend_from_slice(value);
        raw.extend_from_slice(b"\r\n");
        Self::Raw(raw)
    }
}

type Script = dyn Fn(usize, &[Vec<u8>]) -> Reply + Send + Sync;

/// Answers each command with whatever the script returns for it. The script
/// sees the index of the connection (in accept order) and the command's
/// arguments.
pub(crate) struct ScriptedServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub(crate) async fn start<F>(script: F) -> Self
    where
        F: Fn(usize, &[Vec<u8>]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let script: Arc<Script> = Arc::new(script);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = Arc::clone(&commands);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let index = accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        index,
                        Arc::clone(&script),
                        Arc::clone(&commands),
                    ));
                }
            })
        };

        Self {
            addr,
            commands,
            accepted,
            task,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Upper-cased command names in the order they arrived.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Command names from the first `WATCH` on.
    pub(crate) fn commands_from_watch(&self) -> Vec<String> {
        let commands = self.commands();
        let start = commands.iter().position(|c| c == "WATCH").unwrap_or(commands.len());
        commands[start..].to_vec()
    }

    pub(crate) fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    socket: TcpStream,
    index: usize,
    script: Arc<Script>,
    commands: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    while let Ok(Some(args)) = read_command(&mut reader).await {
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_uppercase())
            .unwrap_or_default();
        commands.lock().unwrap().push(name);

        match script(index, &args) {
            Reply::Raw(bytes) => {
                if write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Reply::HangUp => break,
        }
    }
}

async fn read_command<R>(reader: &mut R) -> std::io::Result<Option<Vec<Vec<u8>>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count = parse_header(&line, '*')?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = parse_header(&line, '$')?;
        let mut arg = vec![0; len + 2];
        reader.read_exact(&mut arg).await?;
        arg.truncate(len);
        args.push(arg);
    }
    Ok(Some(args))
}

fn parse_header(line: &str, marker: char) -> std::io::Result<usize> {
    line.trim_end()
        .strip_prefix(marker)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| std::io::Error::other(format!("unexpected RESP line {line:?}")))
}
