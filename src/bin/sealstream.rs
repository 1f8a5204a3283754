//! sealstream CLI - passphrase-based streaming file encryption
//!
//! Command-line interface for encrypting and decrypting files (or stdin to
//! stdout, using `-`) into chunked ChaCha20Poly1305 containers with scrypt
//! key derivation.

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sealstream::error::{ErrorCategory, ErrorKind, Result, SealstreamError};
use sealstream::file_ops::{self, Operation, STDIO_PATH};
use sealstream::header::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use sealstream::passphrase::{
    EnvPassphraseReader, PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader,
};
use sealstream::{EncryptOptions, KdfParams};

#[derive(Parser)]
#[command(name = "sealstream")]
#[command(version)]
#[command(about = "Passphrase-based streaming file encryption.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true, conflicts_with = "passphrase_env")]
    passphrase_stdin: bool,

    /// Read passphrase from the named environment variable
    #[arg(long, global = true, value_name = "VAR")]
    passphrase_env: Option<String>,

    /// Log more (-v info, -vv debug, -vvv trace); SEALSTREAM_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted ("-" for stdin)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the container to ("-" for stdout) [default: input path + .enc]
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Write the container as a single line of URL-safe text
        #[arg(long)]
        armor: bool,

        /// Plaintext bytes per authenticated chunk
        #[arg(
            long,
            value_name = "BYTES",
            env = "SEALSTREAM_CHUNK_SIZE",
            default_value_t = DEFAULT_CHUNK_SIZE,
            value_parser = clap::value_parser!(u32)
                .range(i64::from(MIN_CHUNK_SIZE)..=i64::from(MAX_CHUNK_SIZE))
        )]
        chunk_size: u32,

        /// scrypt cost as log2(N)
        #[arg(
            long,
            value_name = "LOG_N",
            env = "SEALSTREAM_KDF_LOG_N",
            default_value_t = KdfParams::default().log_n,
            value_parser = parse_kdf_log_n
        )]
        kdf_log_n: u8,
    },

    /// Decrypt a file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the container to decrypt ("-" for stdin)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the plaintext to ("-" for stdout) [default: input path without .enc]
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print the header of a container without decrypting it
    Inspect {
        /// Path to the container ("-" for stdin)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", error_chain(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        passphrase_stdin,
        passphrase_env,
        command,
        ..
    } = cli;

    match command {
        Commands::Encrypt {
            input,
            output,
            armor,
            chunk_size,
            kdf_log_n,
        } => {
            let output =
                output.unwrap_or_else(|| file_ops::default_output_path(&input, Operation::Encrypt));
            let options = EncryptOptions::default()
                .with_chunk_size(chunk_size)
                .with_kdf(KdfParams {
                    log_n: kdf_log_n,
                    ..KdfParams::default()
                });
            let mut reader =
                get_passphrase_reader(passphrase_stdin, passphrase_env.as_deref(), &input)?;
            file_ops::encrypt_file(&input, &output, &mut *reader, &options, armor)?;
        }
        Commands::Decrypt { input, output } => {
            let output =
                output.unwrap_or_else(|| file_ops::default_output_path(&input, Operation::Decrypt));
            let mut reader =
                get_passphrase_reader(passphrase_stdin, passphrase_env.as_deref(), &input)?;
            file_ops::decrypt_file(&input, &output, &mut *reader)?;
        }
        Commands::Inspect { input } => {
            let info = file_ops::inspect_file(&input)?;
            println!("{}", info);
        }
    }
    Ok(())
}

/// Accepts a log_n only if scrypt with it and the default r and p stays
/// within the limits decryption enforces.
fn parse_kdf_log_n(value: &str) -> std::result::Result<u8, String> {
    let log_n: u8 = value.parse().map_err(|e| format!("{}", e))?;
    KdfParams {
        log_n,
        ..KdfParams::default()
    }
    .validate()?;
    Ok(log_n)
}

fn get_passphrase_reader(
    use_stdin: bool,
    env_var: Option<&str>,
    input: &Path,
) -> Result<Box<dyn PassphraseReader>> {
    if let Some(var) = env_var {
        return Ok(Box::new(EnvPassphraseReader::new(var)));
    }
    if use_stdin {
        if input == Path::new(STDIO_PATH) {
            return Err(SealstreamError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                "--passphrase-stdin cannot be combined with reading input from stdin",
            ));
        }
        return Ok(Box::new(ReaderPassphraseReader::new(Box::new(io::stdin()))));
    }
    Ok(Box::new(TerminalPassphraseReader::new()))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("SEALSTREAM_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("sealstream={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Renders an error and its sources as "outer: inner: innermost".
fn error_chain(err: &SealstreamError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = inner.source();
    }
    rendered
}
