//! Shared key material generation for the AES-GCM scheme.
//!
//! Generates what every party of a session needs to derive the same key:
//! - A random passphrase (32 bytes, base64) written to file with 0600 permissions
//! - A random salt, printed to stdout (not secret)
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin generate_session_secret -- --out <path> [--force]
//! ```
//!
//! Distribute the passphrase file out of band and pass its contents as
//! `secagg.aes_gcm.passphrase` (or `HISTOSEAL_PASSPHRASE`); pass the salt as
//! `secagg.aes_gcm.salt`.
//!
//! # Security
//!
//! - Uses OS entropy (OsRng)
//! - Passphrase bytes are zeroized from memory after use
//! - Output file has restricted permissions (Unix only)

use base64::engine::general_purpose;
use base64::Engine;
use histoseal::domain::kdf::generate_salt;
use rand::rngs::OsRng;
use rand::RngCore;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use zeroize::Zeroize;
use zeroize::Zeroizing;

const USAGE: &str = "Usage: generate_session_secret --out <path> [--force]";

fn main() {
    let mut args = std::env::args().skip(1);
    let mut out_path: Option<std::path::PathBuf> = None;
    let mut force = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => {
                let p = args.next().unwrap_or_default();
                if p.is_empty() {
                    eprintln!("{USAGE}");
                    std::process::exit(2);
                }
                out_path = Some(std::path::PathBuf::from(p));
            }
            "--force" => force = true,
            "-h" | "--help" => {
                println!(
                    "{USAGE}\n\nWrites a random base64 session passphrase to <path> with 0600 permissions and prints a fresh salt. Prints only non-secret material."
                );
                return;
            }
            _ => {
                eprintln!("Unknown arg: {arg}\n{USAGE}");
                std::process::exit(2);
            }
        }
    }

    let out_path = out_path.unwrap_or_else(|| {
        eprintln!("{USAGE}");
        std::process::exit(2);
    });

    if out_path.exists() && !force {
        eprintln!("Refusing to overwrite existing file {:?}. Use --force.", out_path);
        std::process::exit(3);
    }

    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let passphrase = Zeroizing::new(general_purpose::STANDARD.encode(secret));
    secret.zeroize();

    if let Some(parent) = out_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        opts.mode(0o600);
    }

    let mut file = opts.open(&out_path).unwrap_or_else(|e| {
        eprintln!("Failed to open {:?}: {e}", out_path);
        std::process::exit(4);
    });

    use std::io::Write;
    if let Err(e) = file
        .write_all(passphrase.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
    {
        eprintln!("Failed to write {:?}: {e}", out_path);
        std::process::exit(4);
    }

    // Print only non-secret material.
    println!("Wrote session passphrase (base64) to {:?}", out_path);
    println!("secagg.aes_gcm.salt={}", generate_salt());
}
