use std::process::Command;
use url::Url;

use super::AuthError;

/// Opens the authorization page for the user
pub trait BrowserLauncher: Send + Sync {
  fn open(&self, url: &Url) -> Result<(), AuthError>;
}

/// Hands the URL to the platform's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
  fn open(&self, url: &Url) -> Result<(), AuthError> {
    open_command(std::env::consts::OS, url)
      .spawn()
      .map(|_| ())
      .map_err(|e| AuthError::Browser(e.to_string()))
  }
}

/// The URL is passed as a single argument. On Windows it goes to the URL
/// protocol handler directly, since `cmd /C start` splits it at every `&`.
fn open_command(os: &str, url: &Url) -> Command {
  let mut command = match os {
    "macos" => Command::new("open"),
    "windows" => {
      let mut cmd = Command::new("rundll32");
      cmd.arg("url.dll,FileProtocolHandler");
      cmd
    }
    _ => Command::new("xdg-open"),
  };
  command.arg(url.as_str());
  command
}
