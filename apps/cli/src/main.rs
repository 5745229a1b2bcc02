//! Leitus CLI - toggles encrypted drives described by JSON configurations.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use leitus_core::{
    Diagnosis, ExecutionContext, Leitus, PrivilegeEscalation, StandardLayout, Transition,
    TuningPolicy,
};
use nix::libc;
use nix::sys::signal::{SigHandler, Signal, signal};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_OK: u8 = 0;
const EXIT_USER_CANCEL: i32 = 2;

const CANCELLED: &[u8] = b"\nLeitus cancelled.\n\nSome manual tidy up might be a good idea.\n";

/// Leitus does the legwork so users can relax and enjoy cryptographic drives.
#[derive(Parser)]
#[command(name = "leitus", version, long_about = None)]
struct Cli {
    /// The configuration exercised
    name: Option<String>,

    /// Configuration directory
    #[arg(short, long)]
    conf: Option<PathBuf>,

    /// Profiles directory
    #[arg(short, long)]
    profiles: Option<PathBuf>,

    /// Drives directory
    #[arg(short, long)]
    drives: Option<PathBuf>,

    /// Describes the configuration
    #[arg(short, long)]
    info: bool,

    /// Lists all active drives
    #[arg(short, long)]
    list: bool,

    /// Runs system tools through sudo
    #[arg(long)]
    sudo: bool,

    /// Runs system tools through pkexec
    #[arg(long, conflicts_with = "sudo")]
    pkexec: bool,

    /// Schedules regular checks on LUKS filesystems that have none
    #[arg(long)]
    tune: bool,

    /// Logs every tool invocation
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn layout(&self) -> StandardLayout {
        let mut layout = StandardLayout::discover().unwrap_or_else(|e| {
            warn!("{}, falling back to the working directory", e);
            StandardLayout::new(".", "drives.d", "profiles.d")
        });
        if let Some(conf) = &self.conf {
            layout.conf_d = conf.clone();
        }
        if let Some(drives) = &self.drives {
            layout.drives_d = drives.clone();
        }
        if let Some(profiles) = &self.profiles {
            layout.profiles_d = profiles.clone();
        }
        layout
    }

    fn escalation(&self) -> PrivilegeEscalation {
        if self.sudo {
            PrivilegeEscalation::Sudo
        } else if self.pkexec {
            PrivilegeEscalation::Pkexec
        } else {
            PrivilegeEscalation::None
        }
    }

    fn app(&self) -> Leitus {
        let runner = ExecutionContext::with_escalation(self.escalation());
        let app = Leitus::new(self.layout(), Box::new(runner));
        if self.tune {
            app.with_tuning(TuningPolicy::default())
        } else {
            app
        }
    }
}

extern "C" fn on_interrupt(_: libc::c_int) {
    // Only async-signal-safe calls here.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            CANCELLED.as_ptr().cast(),
            CANCELLED.len(),
        );
        libc::_exit(EXIT_USER_CANCEL);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn execute(cli: &Cli) -> Result<(), Diagnosis> {
    if cli.list {
        let drives = cli.app().list()?;
        println!("Active drives:");
        for drive in drives {
            println!("\t{}", drive);
        }
        println!();
        return Ok(());
    }

    match (&cli.name, cli.info) {
        (Some(name), true) => print!("{}", cli.app().info(name)?),
        (Some(name), false) => match cli.app().perform(name)? {
            Transition::Commissioned => debug!(drive = %name, "drive is up"),
            Transition::Decommissioned => debug!(drive = %name, "drive is down"),
        },
        (None, true) => print!(
            "Leitus {}\n\n  Add the drive name to the command line, and I'll describe its configuration.\n\n  For example 'leitus --info cool'\n\n",
            VERSION
        ),
        (None, false) => print!(
            "Leitus {}\n - Did you want something in particular?\n",
            VERSION
        ),
    }
    Ok(())
}

fn note_failure(diagnosis: &Diagnosis) {
    eprintln!("{}\nLeitus failed.", diagnosis);
    if !diagnosis.fix.is_empty() {
        eprintln!("\n{}", diagnosis.fix);
    }
    if diagnosis.cause != diagnosis.message {
        eprintln!("\n{}", diagnosis.cause);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // SAFETY: the handler only calls async-signal-safe functions.
    if let Err(e) = unsafe { signal(Signal::SIGINT, SigHandler::Handler(on_interrupt)) } {
        warn!("Could not install the interrupt handler: {}", e);
    }

    match execute(&cli) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(diagnosis) => {
            note_failure(&diagnosis);
            ExitCode::from(u8::try_from(diagnosis.exit_code()).unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from(["leitus", "-c", "/etc/leitus", "-d", "/srv/drives", "-i", "music"]);

        assert_eq!(cli.name.as_deref(), Some("music"));
        assert!(cli.info);
        assert!(!cli.list);

        let layout = cli.layout();
        assert_eq!(layout.conf_d, PathBuf::from("/etc/leitus"));
        assert_eq!(layout.drives_d, PathBuf::from("/srv/drives"));
    }

    #[test]
    fn test_parse_list() {
        let cli = Cli::parse_from(["leitus", "--list", "--sudo", "--tune"]);
        assert!(cli.list && cli.sudo && cli.tune);
        assert!(cli.name.is_none());
        assert_eq!(cli.escalation(), PrivilegeEscalation::Sudo);
    }

    #[test]
    fn test_parse_escalation() {
        let cli = Cli::parse_from(["leitus", "--pkexec", "music"]);
        assert_eq!(cli.escalation(), PrivilegeEscalation::Pkexec);

        let cli = Cli::parse_from(["leitus", "music"]);
        assert_eq!(cli.escalation(), PrivilegeEscalation::None);

        assert!(Cli::try_parse_from(["leitus", "--sudo", "--pkexec", "music"]).is_err());
    }
}
