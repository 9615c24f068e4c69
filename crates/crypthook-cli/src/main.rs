//! CryptHook operator tools: preload launcher, packet debugging, key fingerprints.

#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command as Process;

use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use tracing::{debug, info};

use crypthook_common::config::{
    ALLOW_DEFAULT_VAR, CIPHER_VAR, KEY_SALT_VAR, NONCE_SALT_VAR, SECRET_VAR,
};
use crypthook_common::HookConfig;

#[cfg(target_os = "macos")]
const PRELOAD_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
const PRELOAD_VAR: &str = "LD_PRELOAD";

#[derive(Parser, Debug)]
#[command(name = "crypthook")]
#[command(about = "CryptHook operator tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Secret and codec parameters, shared by every keyed subcommand.
#[derive(ClapArgs, Debug, Clone, Default)]
struct KeyArgs {
    /// Shared secret
    #[arg(short, long, env = SECRET_VAR, hide_env_values = true)]
    key: Option<String>,

    /// AEAD suite (aes-256-gcm or chacha20-poly1305)
    #[arg(short, long, env = CIPHER_VAR)]
    cipher: Option<String>,

    /// Key derivation salt
    #[arg(long, env = KEY_SALT_VAR)]
    key_salt: Option<String>,

    /// Nonce derivation salt
    #[arg(long, env = NONCE_SALT_VAR)]
    nonce_salt: Option<String>,

    /// Permit the built-in, publicly known fallback secret
    #[arg(
        long,
        env = ALLOW_DEFAULT_VAR,
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    allow_default_key: bool,
}

impl KeyArgs {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            SECRET_VAR => self.key.clone(),
            CIPHER_VAR => self.cipher.clone(),
            KEY_SALT_VAR => self.key_salt.clone(),
            NONCE_SALT_VAR => self.nonce_salt.clone(),
            ALLOW_DEFAULT_VAR if self.allow_default_key => Some("1".to_string()),
            _ => None,
        }
    }

    fn to_config(&self) -> Result<HookConfig> {
        HookConfig::from_lookup(|name| self.lookup(name)).context("invalid configuration")
    }

    /// Variables the preloaded library reads, as set on the command line.
    fn child_env(&self) -> Vec<(&'static str, String)> {
        [
            SECRET_VAR,
            CIPHER_VAR,
            KEY_SALT_VAR,
            NONCE_SALT_VAR,
            ALLOW_DEFAULT_VAR,
        ]
        .into_iter()
        .filter_map(|name| self.lookup(name).map(|value| (name, value)))
        .collect()
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program with the shim preloaded
    Run {
        /// Path to the preload library
        #[arg(short, long)]
        library: Option<PathBuf>,

        #[command(flatten)]
        keys: KeyArgs,

        /// Program and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<OsString>,
    },

    /// Seal a message and print the packet as hex
    Seal {
        #[command(flatten)]
        keys: KeyArgs,

        /// Plaintext to seal
        text: String,
    },

    /// Open a hex packet and print its plaintext
    Open {
        #[command(flatten)]
        keys: KeyArgs,

        /// Packet bytes as hex
        packet: String,
    },

    /// Show a fingerprint of the derived key
    Fingerprint {
        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    crypthook_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Run {
            library,
            keys,
            program,
        } => run(library, &keys, &program)?,
        Command::Seal { keys, text } => {
            println!("{}", seal(&keys, text.as_bytes())?);
        }
        Command::Open { keys, packet } => {
            let plaintext = open(&keys, &packet)?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Command::Fingerprint { keys } => {
            let config = keys.to_config()?;
            println!("{}  {}", config.key_fingerprint(), config.cipher);
        }
        Command::Version => {
            println!("crypthook {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn seal(keys: &KeyArgs, plaintext: &[u8]) -> Result<String> {
    let codec = keys.to_config()?.build_codec();
    let packet = codec.encode(plaintext).context("failed to seal")?;
    Ok(hex::encode(&packet))
}

fn open(keys: &KeyArgs, packet_hex: &str) -> Result<Vec<u8>> {
    let packet = hex::decode(packet_hex.trim()).context("packet is not valid hex")?;
    let codec = keys.to_config()?.build_codec();
    let plaintext = codec.decode(&packet).context("failed to open")?;
    Ok(plaintext)
}

fn run(library: Option<PathBuf>, keys: &KeyArgs, program: &[OsString]) -> Result<()> {
    // Fail here rather than inside the child, where the error is only a log line.
    let config = keys.to_config()?;

    let library = match library {
        Some(path) => path,
        None => default_library()?,
    };
    if !library.exists() {
        bail!("preload library not found: {}", library.display());
    }
    let library = library
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", library.display()))?;

    let Some((exe, rest)) = program.split_first() else {
        bail!("no program given");
    };

    let preload = preload_value(&library, std::env::var_os(PRELOAD_VAR));
    info!(
        library = %library.display(),
        cipher = %config.cipher,
        fingerprint = %config.key_fingerprint(),
        "launching {:?}",
        exe
    );

    let mut child = Process::new(exe);
    child.args(rest).env(PRELOAD_VAR, &preload);
    for (name, value) in keys.child_env() {
        child.env(name, value);
    }
    debug!("{}={:?}", PRELOAD_VAR, preload);

    exec(child, exe)
}

#[cfg(unix)]
fn exec(mut child: Process, exe: &OsString) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let err = child.exec();
    Err(err).with_context(|| format!("failed to exec {:?}", exe))
}

#[cfg(not(unix))]
fn exec(mut child: Process, exe: &OsString) -> Result<()> {
    let status = child
        .status()
        .with_context(|| format!("failed to run {:?}", exe))?;
    std::process::exit(status.code().unwrap_or(1));
}

/// `libcrypthook` next to the running executable.
fn default_library() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the crypthook executable")?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(library_file_name()))
}

fn library_file_name() -> String {
    format!(
        "{}crypthook{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

/// Put `library` first in the preload list, keeping anything already there.
fn preload_value(library: &Path, existing: Option<OsString>) -> OsString {
    let mut value = library.as_os_str().to_os_string();
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}
