use accessibility_sys::{AXIsProcessTrustedWithOptions, kAXTrustedCheckOptionPrompt};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug, error, info, warn};
use objc2_core_foundation::{CFDictionary, kCFBooleanTrue};
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::{fs, thread};
use stdext::function_name;

mod clipboard;
mod config;
mod engine;
mod errors;
mod expr;
mod focus;
mod input_context;
mod keycode;
mod keytable;
mod ports;
mod replay;
mod service;
mod worker;

use config::TomlConfig;
use engine::Engine;
use ports::ConfigPort;

struct CommandReader {
    config: Arc<TomlConfig>,
    engine: Arc<Engine>,
}

impl CommandReader {
    const SOCKET_PATH: &str = "/tmp/keytap.socket";

    /// Sends a command and its arguments to the running `keytap` daemon
    /// via a Unix socket.
    ///
    /// # Arguments
    ///
    /// * `params` - The command and its arguments, e.g. `["reload"]`.
    fn send_command(params: impl IntoIterator<Item = String>) -> Result<()> {
        let output = params
            .into_iter()
            .flat_map(|param| [param.as_bytes(), &[0]].concat())
            .collect::<Vec<_>>();
        let size: u32 = output.len().try_into().unwrap();
        debug!("{}: {:?} {output:?}", function_name!(), size.to_le_bytes());

        let mut stream = UnixStream::connect(CommandReader::SOCKET_PATH)?;
        stream.write_all(&size.to_le_bytes())?;
        stream.write_all(&output)
    }

    fn new(config: Arc<TomlConfig>, engine: Arc<Engine>) -> Self {
        CommandReader { config, engine }
    }

    /// Starts the `CommandReader` in a new thread, listening for incoming
    /// commands on a Unix socket.
    fn start(self) {
        thread::spawn(move || {
            if let Err(err) = self.runner() {
                error!("{}: {err}", function_name!());
            }
        });
    }

    /// Binds the control socket, reads length-prefixed null-separated
    /// argv buffers, and dispatches each as a runtime command:
    /// `reload`, `toggle-recording`, or `playback`.
    fn runner(&self) -> Result<()> {
        _ = fs::remove_file(CommandReader::SOCKET_PATH);
        let listener = UnixListener::bind(CommandReader::SOCKET_PATH)?;
        for mut stream in listener.incoming().flatten() {
            let mut buffer = [0u8; 4];
            if 4 != stream.read(&mut buffer)? {
                error!("{}: did not read size header.", function_name!());
                continue;
            }
            let size = u32::from_le_bytes(buffer) as usize;
            let mut buffer = vec![0u8; size];
            if size != stream.read(&mut buffer)? {
                continue;
            }
            let argv = buffer
                .split(|c| *c == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).to_string())
                .collect::<Vec<_>>();
            self.dispatch(&argv);
        }
        Ok(())
    }

    fn dispatch(&self, argv: &[String]) {
        match argv.first().map(String::as_str) {
            Some("reload") => match self.config.reload().and_then(|()| self.config.apply(&self.engine)) {
                Ok(()) => info!("config reloaded"),
                Err(e) => warn!("config reload failed, keeping prior config: {e}"),
            },
            Some("toggle-recording") => self.engine.toggle_recording(),
            Some("playback") => self.engine.playback(),
            Some(other) => warn!("{}: unknown command {other:?}", function_name!()),
            None => warn!("{}: empty command.", function_name!()),
        }
    }
}

/// Checks whether keytap has Accessibility privileges, prompting the user
/// to grant them if not.
fn check_ax_privilege() -> bool {
    unsafe {
        let keys = [kAXTrustedCheckOptionPrompt.cast::<objc2_core_foundation::CFString>().as_ref().unwrap()];
        let values = [kCFBooleanTrue.unwrap()];
        let opts = CFDictionary::from_slices(&keys, &values);
        AXIsProcessTrustedWithOptions((&raw const *opts).cast())
    }
}

/// The command line options to be collected.
#[derive(Clone, Debug, Default, Parser)]
#[command(
    version = clap::crate_version!(),
    author = clap::crate_authors!(),
    about = clap::crate_description!(),
)]
pub struct Keytap {
    #[clap(subcommand)]
    subcmd: Option<SubCmd>,
}

#[derive(Clone, Debug, Default, Subcommand)]
pub enum SubCmd {
    /// Launch the daemon directly in the console.
    #[default]
    Launch,

    /// Install the service.
    Install,

    /// Uninstall the service.
    Uninstall,

    /// Reinstall the service.
    Reinstall,

    /// Start the service.
    Start,

    /// Stop the service.
    Stop,

    /// Restart the service.
    Restart,

    /// Send a runtime command to the running daemon (`reload`,
    /// `toggle-recording`, `playback`).
    #[clap(hide = true)]
    SendCmd {
        #[arg(trailing_var_arg = true)]
        cmd: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .target(env_logger::Target::Stderr)
        .filter(None, LevelFilter::Info)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    let daemon = || service::Service::try_new(service::ID);

    match Keytap::parse().subcmd.unwrap_or_default() {
        SubCmd::Launch => launch()?,
        SubCmd::Install => daemon()?.install()?,
        SubCmd::Uninstall => daemon()?.uninstall()?,
        SubCmd::Reinstall => daemon()?.reinstall()?,
        SubCmd::Start => daemon()?.start()?,
        SubCmd::Stop => daemon()?.stop()?,
        SubCmd::Restart => daemon()?.restart()?,
        SubCmd::SendCmd { cmd } => CommandReader::send_command(cmd)?,
    };
    Ok(())
}

/// Launches the keyboard remapper: checks Accessibility privileges,
/// loads the config, wires up the host ports and the engine, and drives
/// the event loop until told to quit.
fn launch() -> Result<()> {
    if !check_ax_privilege() {
        error!("{}: accessibility privilege is disabled.", function_name!());
        return Err(Error::new(
            ErrorKind::Unsupported,
            "Accessibility privilege is disabled. Enable it in Settings -> Privacy & Security -> Accessibility.",
        ));
    }

    let hook = ports::macos::MacHookPort::new();
    let ui = Arc::new(ports::macos::MacUIElementPort::new());
    let clipboard_hook = ports::macos::MacClipboardPort::new();
    let console = Arc::new(ports::macos::LogConsolePort);

    let clipboard_path = clipboard_persist_path();
    let engine = Engine::new(hook.clone(), ui, clipboard_hook, console, clipboard_path);

    let config_path = TomlConfig::default_path()
        .map_err(|e| Error::new(ErrorKind::NotFound, e.to_string()))?;
    let config = Arc::new(
        TomlConfig::load(config_path).map_err(|e| Error::new(ErrorKind::InvalidData, e.to_string()))?,
    );
    // A bad config leaves `engine` with its empty built-in configuration
    // rather than aborting the daemon — the control socket is still worth
    // having up so a corrected config can be sent via `reload`.
    if let Err(e) = config.apply(&engine) {
        warn!("config failed to apply, running with an empty configuration: {e}");
    }

    CommandReader::new(Arc::clone(&config), Arc::clone(&engine)).start();

    hook.start().map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;

    let quit = AtomicBool::new(false);
    ports::macos::run_event_loop(&quit);
    Ok(())
}

/// The clipboard history's JSON persistence path, `~/.config/keytap/clipboard.json`.
fn clipboard_persist_path() -> Option<std::path::PathBuf> {
    std::env::home_dir().map(|home| home.join(".config").join("keytap").join("clipboard.json"))
}
