//! Terminal rendering of the sign-in flow: the two second-factor
//! "dialogs", prompts, and the QR code for authenticator enrollment. All
//! handshake decisions live in [`crate::auth`]; this module only prints
//! and reads.

use crate::{
    api::types::CaptchaChallenge,
    auth::flow::{HandshakeUi, Navigator},
};
use anyhow::{Context, Result};
use qrcode::{render::unicode, QrCode};
use secrecy::SecretString;
use std::{
    fs,
    io::{stdout, Write},
    path::PathBuf,
};
use tracing::warn;

const CAPTCHA_FILE_NAME: &str = "cassa-captcha.png";

pub struct ConsoleUi;

impl HandshakeUi for ConsoleUi {
    fn open_bind_dialog(&self, otpauth: &str) {
        println!();
        println!("No authenticator is bound to this account yet.");
        println!("Scan the QR code below with your authenticator app and enter");
        println!("the 6-digit code it shows to finish enrollment.");
        println!();

        match QrCode::new(otpauth.as_bytes()) {
            Ok(code) => {
                let image = code
                    .render::<unicode::Dense1x2>()
                    .dark_color(unicode::Dense1x2::Light)
                    .light_color(unicode::Dense1x2::Dark)
                    .build();
                println!("{image}");
            }
            Err(err) => warn!("failed to render QR code: {err}"),
        }

        // Printed as well so the secret can be entered by hand.
        println!("{otpauth}");
        println!();
    }

    fn open_verify_dialog(&self) {
        println!();
        println!("Two-factor check: enter the 6-digit code from your authenticator app.");
    }

    fn focus_code_input(&self) {
        eprint!("Authenticator code: ");
        let _ = stdout().lock().flush();
    }

    fn close_dialogs(&self) {
        println!();
    }

    fn show_error(&self, message: &str) {
        eprintln!("{message}");
    }
}

pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, destination: &str) {
        println!("Signed in. Opening {destination}");
    }
}

/// Writes the CAPTCHA image where the operator can open it and returns
/// the path.
pub fn write_captcha_image(challenge: &CaptchaChallenge) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(CAPTCHA_FILE_NAME);
    fs::write(&path, &challenge.image)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub fn prompt_account() -> Result<String> {
    print!("Account: ");
    stdout().lock().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub fn prompt_secret() -> Result<SecretString> {
    let secret = rpassword::prompt_password("Password: ")?;
    Ok(SecretString::from(secret))
}

pub fn prompt_captcha_text(path: &std::path::Path) -> Result<String> {
    println!("CAPTCHA challenge written to {}", path.display());
    print!("CAPTCHA text: ");
    stdout().lock().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Reads a 6-digit code. The prompt itself is printed by the deferred
/// focus effect.
pub fn read_code() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
