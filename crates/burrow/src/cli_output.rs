//! Terminal I/O for the CLI host: JSON on stdout, human notices and prompts on stderr.

use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use std::io::{BufRead as _, IsTerminal as _, Write as _};
use zeroize::Zeroizing;

/// Scripted runs supply the passcode here instead of a prompt.
pub const PASSCODE_ENV: &str = "BURROW_PASSCODE";
pub const THEFT_PASSCODE_ENV: &str = "BURROW_THEFT_PASSCODE";
pub const MNEMONIC_ENV: &str = "BURROW_MNEMONIC";

fn stderr_write(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    let _flush = stderr.flush();
}

fn stderr_writeln(s: &str) {
    stderr_write(&format!("{s}\n"));
}

pub fn write_json(v: &impl Serialize) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")
}

/// Passcode from `BURROW_PASSCODE` if set, otherwise an echo-free prompt on the terminal.
pub fn read_passcode(prompt: &str) -> eyre::Result<SecretString> {
    if let Ok(v) = std::env::var(PASSCODE_ENV) {
        return Ok(SecretString::new(v.into()));
    }
    read_secret(prompt)
}

/// Echo-free prompt; refuses to read secrets from a pipe.
pub fn read_secret(prompt: &str) -> eyre::Result<SecretString> {
    if !std::io::stdin().is_terminal() {
        eyre::bail!("no terminal to prompt on; set {PASSCODE_ENV} for scripted use");
    }
    let s = rpassword::prompt_password(prompt).context("read secret")?;
    Ok(SecretString::new(s.into()))
}

pub fn read_mnemonic() -> eyre::Result<Zeroizing<String>> {
    if let Ok(v) = std::env::var(MNEMONIC_ENV) {
        return Ok(Zeroizing::new(v));
    }
    let phrase = read_secret("Recovery phrase: ")?;
    Ok(Zeroizing::new(phrase.expose_secret().to_owned()))
}

/// Passcode from `env_var`, or entered twice at the prompt; both entries must match.
pub fn read_new_passcode(label: &str, env_var: &str) -> eyre::Result<SecretString> {
    if let Ok(v) = std::env::var(env_var) {
        return Ok(SecretString::new(v.into()));
    }
    let first = read_secret(&format!("{label}: "))?;
    let again = read_secret(&format!("Confirm {}: ", label.to_ascii_lowercase()))?;
    if first.expose_secret() != again.expose_secret() {
        eyre::bail!("entries do not match");
    }
    Ok(first)
}

pub fn print_mnemonic_notice() {
    stderr_writeln(
        "Burrow: write down the recovery phrase in the output now. It is shown only once and \
         is the only way to restore this wallet.",
    );
}

pub fn print_theft_setup_hint() {
    stderr_writeln(
        "Burrow: set a theft passcode with `burrow set-theft-passcode`, or skip with \
         `burrow skip-theft-setup`.",
    );
}

/// Ask before wiping custody, or bail if non-interactive.
pub fn confirm_reset_or_bail(yes: bool) -> eyre::Result<()> {
    if yes {
        return Ok(());
    }
    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    if !interactive {
        eyre::bail!("refusing to reset non-interactively; pass --yes");
    }

    stderr_writeln("Burrow reset deletes the encrypted wallet and the theft passcode.");
    stderr_writeln("Without the recovery phrase the funds are unrecoverable.");
    stderr_write("Type RESET to continue: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read confirmation")?;
    if line.trim() == "RESET" {
        Ok(())
    } else {
        eyre::bail!("reset cancelled")
    }
}
